//! REPL 命令解析

use sb_llm::ProviderKind;

/// 调用目标：`@provider` 或 `@provider/model`
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Target {
    pub provider: Option<ProviderKind>,
    pub model: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Command {
    Help,
    Status,
    Key { provider: ProviderKind, key: String },
    Unkey(ProviderKind),
    Login(ProviderKind),
    Logout(ProviderKind),
    Models(ProviderKind),
    Ask { target: Target, prompt: String },
    Json { target: Target, prompt: String },
    Clear,
    Quit,
}

pub const HELP: &str = "\
Available commands:
  help                          - Show this help message
  status                        - Show credential status per provider
  key <provider> <api-key>      - Save an API key
  unkey <provider>              - Remove a saved API key
  login <provider>              - Sign in with device authorization
  logout <provider>             - Sign out (keeps the API key)
  models <provider>             - List available models
  ask [@provider[/model]] <p>   - Stream a reply (Ctrl+C aborts)
  json [@provider[/model]] <p>  - Generate and extract a JSON object
  clear                         - Clear the screen
  quit / exit                   - Exit the CLI
Providers: qwen, ollama, openai, deepseek";

/// 解析一行输入；空行返回 `None`
pub fn parse(line: &str) -> Result<Option<Command>, String> {
    let line = line.trim();
    let Some((command, rest)) = split_word(line) else {
        return Ok(None);
    };

    let command = match command {
        "help" | "?" => Command::Help,
        "status" => Command::Status,
        "key" => {
            let (provider, key) = split_word(rest).ok_or("usage: key <provider> <api-key>")?;
            if key.is_empty() {
                return Err("usage: key <provider> <api-key>".to_string());
            }
            Command::Key {
                provider: provider_arg(provider)?,
                key: key.to_string(),
            }
        }
        "unkey" => Command::Unkey(single_provider(rest, "unkey")?),
        "login" => Command::Login(single_provider(rest, "login")?),
        "logout" => Command::Logout(single_provider(rest, "logout")?),
        "models" => Command::Models(single_provider(rest, "models")?),
        "ask" => {
            let (target, prompt) = prompt_args(rest, "ask")?;
            Command::Ask { target, prompt }
        }
        "json" => {
            let (target, prompt) = prompt_args(rest, "json")?;
            Command::Json { target, prompt }
        }
        "clear" => Command::Clear,
        "quit" | "exit" => Command::Quit,
        other => return Err(format!("Unknown command: {other}")),
    };
    Ok(Some(command))
}

fn split_word(s: &str) -> Option<(&str, &str)> {
    let s = s.trim_start();
    if s.is_empty() {
        return None;
    }
    match s.split_once(char::is_whitespace) {
        Some((word, rest)) => Some((word, rest.trim())),
        None => Some((s, "")),
    }
}

fn provider_arg(raw: &str) -> Result<ProviderKind, String> {
    raw.parse::<ProviderKind>().map_err(|e| e.to_string())
}

fn single_provider(rest: &str, command: &str) -> Result<ProviderKind, String> {
    match split_word(rest) {
        Some((provider, "")) => provider_arg(provider),
        _ => Err(format!("usage: {command} <provider>")),
    }
}

fn prompt_args(rest: &str, command: &str) -> Result<(Target, String), String> {
    let usage = || format!("usage: {command} [@provider[/model]] <prompt>");

    let mut target = Target::default();
    let mut prompt = rest;
    if let Some((first, remaining)) = split_word(rest) {
        if let Some(target_spec) = first.strip_prefix('@') {
            let (provider, model) = match target_spec.split_once('/') {
                Some((provider, model)) => (provider, Some(model)),
                None => (target_spec, None),
            };
            target.provider = Some(provider_arg(provider)?);
            target.model = model.filter(|m| !m.is_empty()).map(str::to_string);
            prompt = remaining;
        }
    }

    if prompt.is_empty() {
        return Err(usage());
    }
    Ok((target, prompt.to_string()))
}
