use crate::app::App;
use crate::chat::Message;
use crate::citation::{cited_pages, parse_citations, render_with_indices, Segment};
use crate::config::Config;
use crate::doc_processor::DocumentFile;
use clap::Parser;
use std::io::{IsTerminal, Write};
use std::path::{Path, PathBuf};
use tokio::io::{AsyncBufReadExt, BufReader, Lines, Stdin};

#[derive(Debug, Parser)]
#[command(name = "pdf-chat", version, about = "Converse com um PDF; as respostas citam a página")]
pub struct Args {
    /// PDF to open at startup
    pub file: Option<PathBuf>,

    /// Config file (default: $PDF_CHAT_CONFIG or ./pdf-chat.toml)
    #[arg(long)]
    pub config: Option<PathBuf>,

    /// Chat model
    #[arg(long)]
    pub model: Option<String>,

    /// Model used to transcribe PDFs without a text layer
    #[arg(long)]
    pub ocr_model: Option<String>,

    /// Debug logging on stderr
    #[arg(short, long)]
    pub verbose: bool,
}

impl Args {
    pub fn apply(&self, config: &mut Config) {
        if let Some(model) = &self.model {
            config.model = model.clone();
        }
        if let Some(model) = &self.ocr_model {
            config.ocr_model = model.clone();
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Command {
    Open(PathBuf),
    Page,
    Next,
    Prev,
    Goto(u32),
    Cite(usize),
    Help,
    Quit,
    Ask(String),
    Invalid(String),
    Empty,
}

pub fn parse_command(line: &str) -> Command {
    let line = line.trim();
    if line.is_empty() {
        return Command::Empty;
    }
    let Some(rest) = line.strip_prefix(':') else {
        return Command::Ask(line.to_string());
    };

    let (name, arg) = match rest.split_once(char::is_whitespace) {
        Some((name, arg)) => (name, arg.trim()),
        None => (rest, ""),
    };

    match (name, arg) {
        ("open" | "o", "") => Command::Invalid("uso: :open <arquivo.pdf>".into()),
        ("open" | "o", path) => Command::Open(PathBuf::from(path)),
        ("page" | "p", _) => Command::Page,
        ("next" | "n", _) => Command::Next,
        ("prev" | "b", _) => Command::Prev,
        ("goto" | "g", n) => match n.parse() {
            Ok(page) => Command::Goto(page),
            Err(_) => Command::Invalid("uso: :goto <página>".into()),
        },
        ("cite" | "c", k) => match k.parse() {
            Ok(index) if index > 0 => Command::Cite(index),
            _ => Command::Invalid("uso: :cite <n>".into()),
        },
        ("help" | "h" | "?", _) => Command::Help,
        ("quit" | "q" | "exit", _) => Command::Quit,
        (other, _) => Command::Invalid(format!("comando desconhecido: :{}", other)),
    }
}

const HELP: &str = "\
Comandos:
  :open <arquivo.pdf>   envia um PDF
  :page                 mostra a página atual
  :next / :prev         página seguinte / anterior
  :goto <n>             vai para a página n
  :cite <k>             abre a k-ésima citação da última resposta
  :help                 esta ajuda
  :quit                 sai
Qualquer outro texto é uma pergunta sobre o documento.";

pub const CONFIG_ERROR_SCREEN: &str = "\
Erro de Configuração
A chave da API do Gemini não foi encontrada. Defina a variável GEMINI_API_KEY,
coloque `api_key` no arquivo pdf-chat.toml ou informe a chave quando solicitado.";

/// Ask once for the API key, hidden like a password field. Only when a
/// terminal is attached; the key stays in memory.
pub async fn prompt_api_key() -> std::io::Result<Option<String>> {
    if !std::io::stdin().is_terminal() {
        return Ok(None);
    }
    let key = tokio::task::spawn_blocking(|| rpassword::prompt_password("Chave da API do Gemini: "))
        .await
        .map_err(std::io::Error::other)??;
    let key = key.trim().to_string();
    Ok((!key.is_empty()).then_some(key))
}

type InputLines = Lines<BufReader<Stdin>>;

pub async fn run_repl(app: &mut App, initial: Option<PathBuf>) -> anyhow::Result<()> {
    let mut lines = BufReader::new(tokio::io::stdin()).lines();

    println!("{}\n", HELP);
    match initial {
        Some(path) => open(app, &path).await,
        None => println!("Envie seu PDF com :open <arquivo.pdf>"),
    }

    loop {
        prompt();
        let Some(line) = lines.next_line().await? else {
            break;
        };

        match parse_command(&line) {
            Command::Empty => {}
            Command::Quit => break,
            Command::Help => println!("{}", HELP),
            Command::Invalid(msg) => println!("{}", msg),
            Command::Open(path) => open(app, &path).await,
            Command::Page => show_page(app),
            Command::Next => {
                app.viewer_mut().next();
                show_page(app);
            }
            Command::Prev => {
                app.viewer_mut().prev();
                show_page(app);
            }
            Command::Goto(page) => {
                if app.viewer_mut().go_to_page(page) {
                    show_page(app);
                } else {
                    println!("Página {} fora do documento.", page);
                }
            }
            Command::Cite(index) => open_citation(app, index),
            Command::Ask(text) => ask(app, &text, &mut lines).await,
        }
    }

    Ok(())
}

fn prompt() {
    print!("> ");
    let _ = std::io::stdout().flush();
}

async fn open(app: &mut App, path: &Path) {
    let file = match DocumentFile::from_path(path) {
        Ok(file) => file,
        Err(e) => {
            println!("Não foi possível ler {}: {}", path.display(), e);
            return;
        }
    };

    let loaded = app
        .load_document(file, |msg| println!("{}", msg))
        .await
        .map(|doc| {
            let pages = doc
                .page_count
                .map(|n| format!("{} páginas", n))
                .unwrap_or_else(|| "páginas desconhecidas".into());
            format!("{} carregado ({}).", doc.name, pages)
        });

    match loaded {
        Ok(summary) => {
            println!("{}", summary);
            if let Some(greeting) = app.chat().last_bot_message() {
                println!("\n{}", greeting.content);
            }
        }
        Err(e) => println!("{}", e),
    }
}

fn show_page(app: &App) {
    if app.document().is_none() {
        println!("Nenhum documento carregado.");
        return;
    }
    println!("{}", app.viewer().render_current());
}

/// Page of the `index`-th citation (1-based) in `content`.
fn nth_citation(content: &str, index: usize) -> Option<u32> {
    let pages = cited_pages(content);
    index.checked_sub(1).and_then(|i| pages.get(i).copied())
}

fn open_citation(app: &mut App, index: usize) {
    let page = app
        .chat()
        .last_bot_message()
        .and_then(|m| nth_citation(&m.content, index));

    match page {
        Some(page) if app.open_citation(page) => show_page(app),
        Some(page) => println!("Página {} fora do documento.", page),
        None => println!("A última resposta não tem a citação #{}.", index),
    }
}

async fn ask(app: &mut App, text: &str, lines: &mut InputLines) {
    if app.document().is_none() {
        println!("Envie um PDF primeiro com :open <arquivo.pdf>");
        return;
    }

    let mut shown = String::new();
    let on_update = |message: &Message| {
        let out = match message.content.strip_prefix(shown.as_str()) {
            Some(rest) => rest.to_string(),
            // replaced wholesale (failed turn)
            None => format!("\n{}", message.content),
        };
        shown.clone_from(&message.content);
        print!("{}", out);
        let _ = std::io::stdout().flush();
    };

    let outcome = {
        let turn = app.send_message(text, on_update);
        tokio::pin!(turn);
        let mut stdin_open = true;
        loop {
            tokio::select! {
                outcome = &mut turn => break outcome,
                line = lines.next_line(), if stdin_open => match line {
                    Ok(Some(_)) => eprintln!("(aguardando a resposta atual; mensagem ignorada)"),
                    _ => stdin_open = false,
                },
            }
        }
    };
    println!();

    if outcome.is_none() {
        return;
    }
    if let Some(reply) = app.chat().last_bot_message() {
        let segments = parse_citations(&reply.content);
        if segments.iter().any(|s| matches!(s, Segment::Citation { .. })) {
            println!("\nCitações: {}", render_with_indices(&segments));
            println!("Use :cite <k> para abrir a página citada.");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_plain_text_is_a_question() {
        assert_eq!(
            parse_command("  qual o prazo? "),
            Command::Ask("qual o prazo?".into())
        );
        assert_eq!(parse_command("   "), Command::Empty);
    }

    #[test]
    fn test_navigation_commands() {
        assert_eq!(parse_command(":goto 7"), Command::Goto(7));
        assert_eq!(parse_command(":g 2"), Command::Goto(2));
        assert_eq!(parse_command(":next"), Command::Next);
        assert_eq!(parse_command(":prev"), Command::Prev);
        assert_eq!(parse_command(":page"), Command::Page);
        assert_eq!(parse_command(":cite 1"), Command::Cite(1));
        assert!(matches!(parse_command(":cite 0"), Command::Invalid(_)));
        assert!(matches!(parse_command(":goto x"), Command::Invalid(_)));
    }

    #[test]
    fn test_open_keeps_spaces_in_path() {
        assert_eq!(
            parse_command(":open meus docs/edital 2025.pdf"),
            Command::Open(PathBuf::from("meus docs/edital 2025.pdf"))
        );
        assert!(matches!(parse_command(":open"), Command::Invalid(_)));
    }

    #[test]
    fn test_unknown_command() {
        assert_eq!(
            parse_command(":bogus"),
            Command::Invalid("comando desconhecido: :bogus".into())
        );
        assert_eq!(parse_command(":q"), Command::Quit);
    }

    #[test]
    fn test_nth_citation_is_one_based() {
        let reply = "Prazo [Página 3] e taxa [Página 7, 8].";
        assert_eq!(nth_citation(reply, 1), Some(3));
        assert_eq!(nth_citation(reply, 2), Some(7));
        assert_eq!(nth_citation(reply, 3), None);
        assert_eq!(nth_citation(reply, 0), None);
        assert_eq!(nth_citation("sem citações", 1), None);
    }

    #[test]
    fn test_args_override_models() {
        let args = Args::parse_from(["pdf-chat", "--model", "m1", "--ocr-model", "m2", "a.pdf"]);
        let mut config = Config::default();
        args.apply(&mut config);
        assert_eq!(config.model, "m1");
        assert_eq!(config.ocr_model, "m2");
        assert_eq!(args.file, Some(PathBuf::from("a.pdf")));
    }
}
