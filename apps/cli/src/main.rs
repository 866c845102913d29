//! Switchboard CLI - 凭据配置与生成调用的交互终端

mod commands;

use std::io::{self, BufRead, Write};
use std::sync::{Arc, Mutex, MutexGuard};

use anyhow::Context;
use sb_llm::{ChunkCallback, GatewayConfig, GenerationRequest, ProviderKind, Session};
use tokio_util::sync::CancellationToken;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use commands::{Command, Target, HELP};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // 初始化日志
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "sb=info,sb_llm=info".into()),
        )
        .with(tracing_subscriber::fmt::layer().with_writer(io::stderr))
        .init();

    let config = GatewayConfig::load().context("failed to load configuration")?;
    let session = Session::open(config).context("failed to open credential store")?;
    let interrupt = Interrupt::install();

    println!("Switchboard CLI v{}", env!("CARGO_PKG_VERSION"));
    println!("Type 'help' for available commands, 'quit' to exit.");
    println!();

    let stdin = io::stdin();
    let mut stdout = io::stdout();

    loop {
        print!("sb> ");
        stdout.flush()?;

        let mut input = String::new();
        if stdin.lock().read_line(&mut input)? == 0 {
            break;
        }

        let command = match commands::parse(&input) {
            Ok(Some(command)) => command,
            Ok(None) => continue,
            Err(message) => {
                println!("{message}");
                println!("Type 'help' for available commands.");
                continue;
            }
        };

        if command == Command::Quit {
            println!("Goodbye!");
            break;
        }
        if let Err(e) = run(&session, &interrupt, command).await {
            println!("Error: {e}");
        }
    }

    Ok(())
}

async fn run(session: &Session, interrupt: &Interrupt, command: Command) -> anyhow::Result<()> {
    match command {
        Command::Help => println!("{HELP}"),
        Command::Status => print_status(session),
        Command::Key { provider, key } => {
            session.set_api_key(provider, &key)?;
            println!("Saved API key for {provider}.");
        }
        Command::Unkey(provider) => {
            session.clear_api_key(provider)?;
            println!("Removed API key for {provider}.");
        }
        Command::Login(provider) => {
            session
                .sign_in(provider, |s| {
                    println!("Open this URL to approve the sign-in:");
                    println!("  {}", s.verification_target());
                    println!("User code: {}", s.user_code);
                    println!("Waiting for approval...");
                })
                .await?;
            println!("Signed in to {provider}.");
        }
        Command::Logout(provider) => {
            session.sign_out(provider)?;
            println!("Signed out of {provider}.");
        }
        Command::Models(provider) => {
            for model in session.gateway().list_models(provider).await? {
                println!("  {model}");
            }
        }
        Command::Ask { target, prompt } => ask(session, interrupt, target, prompt).await?,
        Command::Json { target, prompt } => {
            let value = session
                .gateway()
                .generate_structured(
                    &GenerationRequest::prompt(prompt),
                    target.provider,
                    target.model.as_deref(),
                )
                .await?;
            println!("{}", serde_json::to_string_pretty(&value)?);
        }
        Command::Clear => print!("\x1B[2J\x1B[1;1H"),
        Command::Quit => {}
    }
    Ok(())
}

/// 进程级 Ctrl+C 处理：有流式请求时取消它，空闲时退出
#[derive(Clone, Default)]
struct Interrupt {
    in_flight: Arc<Mutex<Option<CancellationToken>>>,
}

impl Interrupt {
    fn install() -> Self {
        let interrupt = Self::default();
        let handler = interrupt.clone();
        tokio::spawn(async move {
            while tokio::signal::ctrl_c().await.is_ok() {
                if !handler.fire() {
                    println!();
                    std::process::exit(130);
                }
            }
        });
        interrupt
    }

    /// 登记当前请求的取消令牌
    fn begin(&self) -> CancellationToken {
        let cancel = CancellationToken::new();
        *self.slot() = Some(cancel.clone());
        cancel
    }

    fn finish(&self) {
        self.slot().take();
    }

    /// 取消进行中的请求；没有请求时返回 false
    fn fire(&self) -> bool {
        let in_flight = self.slot().take();
        match in_flight {
            Some(cancel) => {
                cancel.cancel();
                true
            }
            None => false,
        }
    }

    fn slot(&self) -> MutexGuard<'_, Option<CancellationToken>> {
        self.in_flight.lock().unwrap_or_else(|p| p.into_inner())
    }
}

async fn ask(
    session: &Session,
    interrupt: &Interrupt,
    target: Target,
    prompt: String,
) -> anyhow::Result<()> {
    let cancel = interrupt.begin();

    let on_chunk: ChunkCallback = Arc::new(|text: &str| {
        print!("{text}");
        let _ = io::stdout().flush();
    });
    let result = session
        .gateway()
        .generate_streaming(
            &GenerationRequest::prompt(prompt),
            on_chunk,
            cancel,
            target.provider,
            target.model.as_deref(),
        )
        .await;
    interrupt.finish();
    println!();

    if !result.success {
        anyhow::bail!(result.error.unwrap_or_else(|| "unknown error".to_string()));
    }
    Ok(())
}

fn print_status(session: &Session) {
    println!("Providers:");
    for status in session.status() {
        let mut line = format!(
            "  {:<9} api-key: {:<3}  signed-in: {}",
            status.provider.as_str(),
            if status.has_api_key { "yes" } else { "no" },
            if status.signed_in { "yes" } else { "no" },
        );
        if status.token_expired {
            line.push_str(" (expired, refresh on next call)");
        }
        if let Some(url) = &status.resource_url {
            line.push_str(&format!("  route: {url}"));
        }
        println!("{line}");
    }

    println!(
        "Fallback order: {}",
        session.gateway().candidates(None).describe()
    );
    if let Some(store) = session.store().path() {
        println!("Credentials: {}", store.display());
    }
    if !ProviderKind::ALL
        .iter()
        .any(|&p| session.is_authenticated(p))
    {
        println!("No provider is configured yet: use 'key' or 'login'.");
    }
}
