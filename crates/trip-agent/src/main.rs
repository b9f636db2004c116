//! A terminal front end for `trip-agent`.

#[macro_use]
extern crate tracing;

use std::io::Write as _;
use std::path::PathBuf;
use std::pin::pin;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context as _, bail};
use clap::{Parser, Subcommand};
use indicatif::{ProgressBar, ProgressStyle};
use owo_colors::OwoColorize;
use tokio::io::{self, AsyncBufReadExt};
use tokio::select;
use tokio::sync::mpsc;
use tokio::time::sleep;
use trip_agent::config::{AppConfig, RendererKind};
use trip_agent::core::email::{EmailParams, Mailer, ModelEmailRenderer};
use trip_agent::core::store::FsStateStore;
use trip_agent::mail::{SendGridMailer, UnavailableMailer};
use trip_agent::tools::SerpApiClient;
use trip_agent::{TravelAgent, TravelAgentBuilder};
use trip_agent_openai_model::OpenAIProvider;

const BAR_CHAR: &str = "▎";

#[derive(Parser, Debug)]
#[command(name = "trip-agent", version, about = "Finds flights and hotels")]
struct Cli {
    /// Directory the threads are stored in, overrides
    /// TRIP_AGENT_STATE_DIR.
    #[arg(long, global = true)]
    state_dir: Option<PathBuf>,

    #[command(subcommand)]
    command: Option<Command>,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Chat in the terminal (default command)
    Chat {
        /// Resume an existing thread.
        #[arg(long)]
        thread: Option<String>,
    },
    /// Ask one question and print the answer
    Ask {
        /// Add the question to an existing thread.
        #[arg(long)]
        thread: Option<String>,
        #[arg(required = true)]
        query: Vec<String>,
    },
    /// Continue a thread that stopped before answering
    Continue { thread: String },
    /// Email the answer of a thread
    Send {
        thread: String,
        /// The recipient, defaults to TO_EMAIL.
        #[arg(long)]
        to: Option<String>,
        /// The sender, defaults to FROM_EMAIL.
        #[arg(long)]
        from: Option<String>,
        /// The subject, defaults to EMAIL_SUBJECT.
        #[arg(long)]
        subject: Option<String>,
    },
    /// Delete a thread
    Discard { thread: String },
    /// Print the stored state of a thread
    Show { thread: String },
}

struct Terminal {
    agent: TravelAgent,
    config: AppConfig,
    progress: Progress,
}

/// Shows the progress of a running operation.
struct Progress {
    transcript_rx: mpsc::UnboundedReceiver<String>,
    style: ProgressStyle,
}

#[tokio::main(flavor = "current_thread")]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .init();

    let cli = Cli::parse();
    let mut config = AppConfig::from_env()?;
    if let Some(state_dir) = cli.state_dir {
        config.state_dir = state_dir;
    }
    debug!("{config:?}");

    let (transcript_tx, transcript_rx) = mpsc::unbounded_channel();
    let agent = build_agent(&config, move |delta| {
        transcript_tx.send(delta.to_owned()).ok();
    });
    let progress_style = ProgressStyle::with_template("{spinner} {wide_msg}")
        .context("invalid progress template")?
        .tick_chars("⠋⠙⠹⠸⠼⠴⠦⠧⠇⠏");
    let mut terminal = Terminal {
        agent,
        config,
        progress: Progress {
            transcript_rx,
            style: progress_style,
        },
    };

    match cli.command.unwrap_or(Command::Chat { thread: None }) {
        Command::Chat { thread } => terminal.chat(thread).await,
        Command::Ask { thread, query } => {
            let thread = thread.unwrap_or_else(new_thread_id);
            terminal.ask(&thread, query.join(" ")).await
        }
        Command::Continue { thread } => {
            terminal.continue_thread(&thread).await
        }
        Command::Send {
            thread,
            to,
            from,
            subject,
        } => {
            let params = terminal.email_params(to, from, subject)?;
            terminal.send(&thread, &params).await
        }
        Command::Discard { thread } => {
            terminal.agent.discard(&thread).await?;
            println!("Thread {thread} discarded.");
            Ok(())
        }
        Command::Show { thread } => {
            let Some(conversation) = terminal.agent.state(&thread).await?
            else {
                bail!("thread {thread} does not exist");
            };
            println!("{}", serde_json::to_string_pretty(&conversation)?);
            Ok(())
        }
    }
}

fn build_agent(
    config: &AppConfig,
    on_transcript: impl Fn(&str) + Send + Sync + 'static,
) -> TravelAgent {
    let provider = OpenAIProvider::new(config.openai_config());
    let mailer: Arc<dyn Mailer> = match &config.sendgrid_api_key {
        Some(api_key) => Arc::new(SendGridMailer::new(api_key)),
        None => Arc::new(UnavailableMailer::new(
            "SENDGRID_API_KEY environment variable is not set",
        )),
    };
    let mut builder = TravelAgentBuilder::new(
        provider.clone(),
        SerpApiClient::new(config.serpapi_api_key.clone()),
        Arc::new(FsStateStore::new(&config.state_dir)),
        mailer,
    )
    .on_transcript(on_transcript);

    if let Some(max_iterations) = config.max_iterations {
        builder = builder.with_max_iterations(max_iterations);
    }
    if config.email_renderer == RendererKind::Model {
        let renderer = ModelEmailRenderer::with_model_provider(provider);
        builder = builder.with_email_renderer(Arc::new(renderer));
    }
    builder.build()
}

impl Terminal {
    async fn chat(&mut self, thread: Option<String>) -> anyhow::Result<()> {
        let thread = thread.unwrap_or_else(new_thread_id);
        println!("{}", format!("Thread {thread}").dimmed());

        loop {
            let Some(line) = prompt("> ").await else {
                break;
            };
            let line = line.trim();
            if line.is_empty() {
                continue;
            }

            let fut = self.agent.submit_query(&thread, line);
            let (result, streamed) = self.progress.wait_for(fut).await;
            match result {
                Ok(answer) => print_answer(&answer, streamed),
                Err(err) => {
                    print_error(&err);
                    continue;
                }
            }

            let Some(line) = prompt("Send this by email? [y/N]: ").await
            else {
                break;
            };
            if !line.trim().eq_ignore_ascii_case("y") {
                println!();
                continue;
            }
            let to = match &self.config.to_email {
                Some(to) => to.clone(),
                None => match prompt("To: ").await {
                    Some(to) => to.trim().to_owned(),
                    None => break,
                },
            };
            match self.email_params(Some(to), None, None) {
                Ok(params) => {
                    if let Err(err) = self.send(&thread, &params).await {
                        print_error(&err);
                    }
                }
                Err(err) => print_error(&err),
            }
            println!();
        }
        Ok(())
    }

    async fn ask(
        &mut self,
        thread: &str,
        query: String,
    ) -> anyhow::Result<()> {
        let fut = self.agent.submit_query(thread, query);
        let (result, streamed) = self.progress.wait_for(fut).await;
        print_answer(&result?, streamed);
        print_send_hint(thread);
        Ok(())
    }

    async fn continue_thread(&mut self, thread: &str) -> anyhow::Result<()> {
        let fut = self.agent.continue_thread(thread);
        let (result, streamed) = self.progress.wait_for(fut).await;
        print_answer(&result?, streamed);
        print_send_hint(thread);
        Ok(())
    }

    async fn send(
        &mut self,
        thread: &str,
        params: &EmailParams,
    ) -> anyhow::Result<()> {
        let fut = self.agent.confirm_send(thread, params);
        let (result, _) = self.progress.wait_for(fut).await;
        result?;
        println!("{}📧 Sent to {}", BAR_CHAR.bright_green(), params.to);
        Ok(())
    }

    fn email_params(
        &self,
        to: Option<String>,
        from: Option<String>,
        subject: Option<String>,
    ) -> anyhow::Result<EmailParams> {
        let Some(to) = to.or_else(|| self.config.to_email.clone()) else {
            bail!("no recipient, pass --to or set TO_EMAIL");
        };
        let Some(from) = from.or_else(|| self.config.from_email.clone())
        else {
            bail!("no sender, pass --from or set FROM_EMAIL");
        };
        let subject =
            subject.unwrap_or_else(|| self.config.email_subject.clone());
        Ok(EmailParams::new(from, to, subject))
    }
}

impl Progress {
    /// Drives `fut` while showing a spinner, and prints the transcript as
    /// it streams. Returns the output and whether anything was printed.
    async fn wait_for<T>(
        &mut self,
        fut: impl Future<Output = T>,
    ) -> (T, bool) {
        let mut fut = pin!(fut);
        let mut progress_bar = None;
        let mut streamed = false;

        loop {
            if !streamed {
                progress_bar
                    .get_or_insert_with(|| {
                        let progress_bar = ProgressBar::new_spinner();
                        progress_bar.set_style(self.style.clone());
                        progress_bar.set_message("🤔 Thinking...");
                        progress_bar
                    })
                    .inc(1);
            }

            let sleep = sleep(Duration::from_millis(100));
            select! {
                // Print what has streamed before taking the output.
                biased;

                Some(delta) = self.transcript_rx.recv() => {
                    // Finish the progress bar before printing anything else.
                    if let Some(progress_bar) = progress_bar.take() {
                        progress_bar.finish_and_clear();
                    }
                    if !streamed {
                        print!("{}🤖 ", BAR_CHAR.bright_cyan());
                        streamed = true;
                    }
                    print!("{}", delta.bright_white());
                    std::io::stdout().flush().ok();
                }
                output = &mut fut => {
                    if let Some(progress_bar) = progress_bar.take() {
                        progress_bar.finish_and_clear();
                    }
                    if streamed {
                        println!();
                    }
                    return (output, streamed);
                }
                _ = sleep => {}
            }
        }
    }
}

fn print_answer(answer: &str, streamed: bool) {
    if !streamed {
        println!("{}🤖 {}", BAR_CHAR.bright_cyan(), answer.bright_white());
    }
}

fn print_send_hint(thread: &str) {
    let hint = format!("Run `trip-agent send {thread}` to email the answer.");
    println!("{}", hint.dimmed());
}

fn print_error(err: &dyn std::fmt::Display) {
    println!("{}⚠️  {}", BAR_CHAR.bright_red(), err.bright_red());
}

fn new_thread_id() -> String {
    uuid::Uuid::new_v4().to_string()
}

async fn prompt(label: &str) -> Option<String> {
    print!("{label}");
    std::io::stdout().flush().ok();
    read_line().await
}

async fn read_line() -> Option<String> {
    let mut stdin = io::BufReader::new(io::stdin());
    let mut line = String::new();

    match stdin.read_line(&mut line).await {
        Ok(0) => None,
        Ok(_) => Some(line),
        Err(err) => {
            error!("error reading input: {}", err);
            None
        }
    }
}
