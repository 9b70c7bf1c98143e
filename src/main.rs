#[tokio::main]
async fn main() -> anyhow::Result<()> {
    pdf_chat_lib::run().await
}
