const SESSION_HELP: &str = "Commands:
  submit PATH   upload a file, or queue it when offline
  refresh       reload the server file list
  status        reload the upload queue
  flush         ask for a background sync now
  help          show this help
  quit          exit";

#[derive(Debug, Clone, PartialEq, Eq)]
enum SessionCommand {
    Submit(PathBuf),
    Refresh,
    Status,
    Flush,
    Help,
    Quit,
    Empty,
}

fn parse_session_command(line: &str) -> Result<SessionCommand, String> {
    let line = line.trim();
    let (command, rest) = match line.split_once(char::is_whitespace) {
        Some((command, rest)) => (command, rest.trim()),
        None => (line, ""),
    };
    match (command, rest) {
        ("", _) => Ok(SessionCommand::Empty),
        ("submit", "") => Err("Please choose a file.".to_string()),
        ("submit", path) => Ok(SessionCommand::Submit(PathBuf::from(path))),
        ("refresh", "") => Ok(SessionCommand::Refresh),
        ("status", "") => Ok(SessionCommand::Status),
        ("flush", "") => Ok(SessionCommand::Flush),
        ("help", "") => Ok(SessionCommand::Help),
        ("quit" | "exit", "") => Ok(SessionCommand::Quit),
        (other, _) => Err(format!("unknown command: {other}")),
    }
}

fn event_line(event: &crate::notify::QueueEvent) -> serde_json::Result<String> {
    let mut line = serde_json::to_string(event)?;
    line.push('\n');
    Ok(line)
}

fn expand_with_home(value: &str, home: &Path) -> PathBuf {
    if value == "~" {
        return home.to_path_buf();
    }
    if let Some(rest) = value.strip_prefix("~/") {
        return home.join(rest);
    }
    PathBuf::from(value)
}

fn default_cache_root() -> PathBuf {
    dirs::cache_dir()
        .unwrap_or_else(std::env::temp_dir)
        .join("upq")
        .join("shell")
}

fn read_u64_env(name: &str, default: u64) -> u64 {
    std::env::var(name)
        .ok()
        .and_then(|value| value.parse::<u64>().ok())
        .filter(|value| *value > 0)
        .unwrap_or(default)
}
