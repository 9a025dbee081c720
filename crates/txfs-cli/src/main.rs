//! Interactive console for the txfs file store.
//!
//! One command per line; file operations accept `--txn <id>` to run under
//! a named transaction instead of auto-commit. The console is a thin
//! dispatcher: all semantics live in `txfs-core`.

use std::io::{self, BufRead, Write as _};
use std::path::PathBuf;

use clap::Parser;
use txfs_core::FileStore;
use txfs_error::TxfsError;
use txfs_types::{IsolationLevel, TxnId};

#[derive(Parser, Debug)]
#[command(name = "txfs", about = "In-memory transactional file store console")]
struct Cli {
    /// Execute commands from a file instead of reading stdin interactively.
    #[arg(long)]
    script: Option<PathBuf>,
}

/// A parsed console command.
#[derive(Debug, Clone, PartialEq, Eq)]
enum Command {
    Mkdir(String),
    Touch(String),
    Open(String),
    Close { path: String, txn: Option<TxnId> },
    Read { path: String, txn: Option<TxnId> },
    Write { path: String, content: String, txn: Option<TxnId> },
    Rm(String),
    Mv { src: String, dst: String },
    Ls { path: Option<String> },
    Cd(String),
    Pwd,
    Find(String),
    TxnStart(IsolationLevel),
    TxnCommit(TxnId),
    TxnAbort(TxnId),
    TxnStatus(TxnId),
    TxnList,
    Help,
    Exit,
}

/// Extract a `--txn <id>` pair from an argument list, returning the
/// remaining arguments and the parsed id.
fn split_txn<'a>(args: &[&'a str]) -> Result<(Vec<&'a str>, Option<TxnId>), String> {
    let Some(pos) = args.iter().position(|a| *a == "--txn") else {
        return Ok((args.to_vec(), None));
    };
    let Some(raw) = args.get(pos + 1) else {
        return Err("--txn requires a transaction ID".to_owned());
    };
    let txn = raw
        .parse::<TxnId>()
        .map_err(|_| format!("invalid transaction ID: '{raw}'"))?;
    let mut rest = args.to_vec();
    rest.drain(pos..=pos + 1);
    Ok((rest, Some(txn)))
}

fn parse(line: &str) -> Result<Option<Command>, String> {
    let tokens: Vec<&str> = line.split_whitespace().collect();
    let Some((&cmd, args)) = tokens.split_first() else {
        return Ok(None);
    };

    let one = |usage: &str| -> Result<String, String> {
        match args {
            [only] => Ok((*only).to_owned()),
            _ => Err(format!("Usage: {usage}")),
        }
    };

    let command = match cmd {
        "mkdir" => Command::Mkdir(one("mkdir <path>")?),
        "touch" => Command::Touch(one("touch <path>")?),
        "open" => Command::Open(one("open <path>")?),
        "rm" => Command::Rm(one("rm <path>")?),
        "cd" => Command::Cd(one("cd <path>")?),
        "find" => Command::Find(one("find <name>")?),
        "pwd" => Command::Pwd,
        "help" => Command::Help,
        "exit" => Command::Exit,
        "txn_list" => Command::TxnList,
        "mv" => match args {
            [src, dst] => Command::Mv {
                src: (*src).to_owned(),
                dst: (*dst).to_owned(),
            },
            _ => return Err("Usage: mv <src> <dst>".to_owned()),
        },
        "ls" => match args {
            [] => Command::Ls { path: None },
            [path] => Command::Ls {
                path: Some((*path).to_owned()),
            },
            _ => return Err("Usage: ls [<path>]".to_owned()),
        },
        "close" => {
            let (rest, txn) = split_txn(args)?;
            match rest.as_slice() {
                [path] => Command::Close {
                    path: (*path).to_owned(),
                    txn,
                },
                _ => return Err("Usage: close <path> [--txn <id>]".to_owned()),
            }
        }
        "read" => {
            let (rest, txn) = split_txn(args)?;
            match rest.as_slice() {
                [path] => Command::Read {
                    path: (*path).to_owned(),
                    txn,
                },
                _ => return Err("Usage: read <path> [--txn <id>]".to_owned()),
            }
        }
        "write" => {
            let (rest, txn) = split_txn(args)?;
            match rest.split_first() {
                Some((path, content)) if !content.is_empty() => Command::Write {
                    path: (*path).to_owned(),
                    content: content.join(" "),
                    txn,
                },
                _ => return Err("Usage: write <path> <content> [--txn <id>]".to_owned()),
            }
        }
        "txn_start" => {
            let isolation = match args {
                [] => IsolationLevel::default(),
                [token] => token.parse::<IsolationLevel>().map_err(|e| {
                    TxfsError::IsolationUnknown {
                        token: e.token().to_owned(),
                    }
                    .to_string()
                })?,
                _ => return Err("Usage: txn_start [<isolation>]".to_owned()),
            };
            Command::TxnStart(isolation)
        }
        "txn_commit" | "txn_abort" | "txn_status" => {
            let raw = one(&format!("{cmd} <txn_id>"))?;
            let txn = raw
                .parse::<TxnId>()
                .map_err(|_| format!("invalid transaction ID: '{raw}'"))?;
            match cmd {
                "txn_commit" => Command::TxnCommit(txn),
                "txn_abort" => Command::TxnAbort(txn),
                _ => Command::TxnStatus(txn),
            }
        }
        other => return Err(format!("Unknown command: {other}")),
    };
    Ok(Some(command))
}

const HELP: &str = "\
  help                                Show this help message
  exit                                Exit the console

  # Directory operations:
  pwd                                 Print working directory
  ls [<path>]                         List directory contents
  cd <path>                           Change directory
  mkdir <path>                        Create directory
  find <name>                         Find entries by name

  # File operations:
  touch <path>                        Create empty file
  rm <path>                           Remove file or empty directory
  mv <src> <dst>                      Move or rename
  open <path>                         Open file for reading/writing
  close <path> [--txn <id>]           Drop a transaction's cached view
  read <path> [--txn <id>]            Read file contents
  write <path> <content> [--txn <id>] Write content to file

  # Transaction operations:
  txn_start [<isolation>]             Start transaction (READ_UNCOMMITTED |
                                      READ_COMMITTED | SNAPSHOT)
  txn_commit <id>                     Commit transaction
  txn_abort <id>                      Abort transaction
  txn_status <id>                     Show transaction state
  txn_list                            List active transactions";

struct Console {
    store: FileStore,
}

impl Console {
    fn new() -> Self {
        Self {
            store: FileStore::new(),
        }
    }

    /// Execute one command; `Ok(false)` means exit was requested.
    fn execute(&self, command: Command, out: &mut impl io::Write) -> io::Result<bool> {
        match self.run_command(command, out)? {
            ControlFlow::Continue => Ok(true),
            ControlFlow::Exit => Ok(false),
        }
    }

    fn run_command(
        &self,
        command: Command,
        out: &mut impl io::Write,
    ) -> io::Result<ControlFlow> {
        let result = match command {
            Command::Exit => return Ok(ControlFlow::Exit),
            Command::Help => {
                writeln!(out, "{HELP}")?;
                Ok(())
            }
            Command::Pwd => {
                writeln!(out, "{}", self.store.pwd())?;
                Ok(())
            }
            Command::Mkdir(path) => self.store.mkdir(&path, None),
            Command::Touch(path) => self.store.touch(&path, None),
            Command::Rm(path) => self.store.rm(&path, None),
            Command::Cd(path) => self.store.cd(&path, None),
            Command::Mv { src, dst } => self.store.mv(&src, &dst, None),
            Command::Open(path) => match self.store.open(&path, None) {
                Ok(()) => {
                    writeln!(out, "Opened: {path}")?;
                    Ok(())
                }
                Err(e) => Err(e),
            },
            Command::Close { path, txn } => match self.store.close(&path, txn) {
                Ok(()) => {
                    writeln!(out, "Closed: {path}")?;
                    Ok(())
                }
                Err(e) => Err(e),
            },
            Command::Ls { path } => match self.store.ls(path.as_deref().unwrap_or("."), None) {
                Ok(names) => {
                    for name in names {
                        writeln!(out, "{name}")?;
                    }
                    Ok(())
                }
                Err(e) => Err(e),
            },
            Command::Find(name) => {
                for found in self.store.find(&name) {
                    writeln!(out, "{found}")?;
                }
                Ok(())
            }
            Command::Read { path, txn } => match self.store.read(&path, txn) {
                Ok(content) => {
                    if content.is_empty() {
                        writeln!(out, "(empty file)")?;
                    } else {
                        writeln!(out, "{content}")?;
                    }
                    Ok(())
                }
                Err(e) => Err(e),
            },
            Command::Write { path, content, txn } => {
                match self.store.write(&path, &content, txn) {
                    Ok(()) => {
                        writeln!(out, "Content written")?;
                        Ok(())
                    }
                    Err(e) => Err(e),
                }
            }
            Command::TxnStart(isolation) => {
                let id = self.store.begin(isolation);
                writeln!(out, "Transaction started: {id}")?;
                Ok(())
            }
            Command::TxnCommit(txn) => match self.store.commit(txn) {
                Ok(()) => {
                    writeln!(out, "Transaction committed: {txn}")?;
                    Ok(())
                }
                Err(e) => Err(e),
            },
            Command::TxnAbort(txn) => match self.store.abort(txn) {
                Ok(()) => {
                    writeln!(out, "Transaction aborted: {txn}")?;
                    Ok(())
                }
                Err(e) => Err(e),
            },
            Command::TxnStatus(txn) => match self.store.txn_status(txn) {
                Ok(status) => {
                    let end = status
                        .ended_at
                        .map_or(String::new(), |t| format!(", End: {t}"));
                    writeln!(
                        out,
                        "Status: {}, Isolation: {}, Start: {}{end}",
                        status.state, status.isolation, status.started_at
                    )?;
                    Ok(())
                }
                Err(e) => Err(e),
            },
            Command::TxnList => {
                let active: Vec<String> = self
                    .store
                    .transactions()
                    .into_iter()
                    .filter(|s| !s.state.is_terminal())
                    .map(|s| s.id.to_string())
                    .collect();
                if active.is_empty() {
                    writeln!(out, "No active transactions")?;
                } else {
                    for id in active {
                        writeln!(out, "  {id}")?;
                    }
                }
                Ok(())
            }
        };
        if let Err(e) = result {
            writeln!(out, "Error: {e}")?;
        }
        Ok(ControlFlow::Continue)
    }

    fn dispatch_line(&self, line: &str, out: &mut impl io::Write) -> io::Result<bool> {
        match parse(line) {
            Ok(Some(command)) => self.execute(command, out),
            Ok(None) => Ok(true),
            Err(message) => {
                writeln!(out, "Error: {message}")?;
                Ok(true)
            }
        }
    }

    fn run_interactive(&self) -> io::Result<()> {
        let stdin = io::stdin();
        let mut stdout = io::stdout();
        writeln!(stdout, "txfs console - type 'help' for commands")?;
        loop {
            write!(stdout, "{}> ", self.store.pwd())?;
            stdout.flush()?;
            let mut line = String::new();
            if stdin.lock().read_line(&mut line)? == 0 {
                return Ok(()); // EOF
            }
            if !self.dispatch_line(&line, &mut stdout)? {
                return Ok(());
            }
        }
    }

    fn run_script(&self, script: &PathBuf) -> io::Result<()> {
        let mut stdout = io::stdout();
        for line in std::fs::read_to_string(script)?.lines() {
            if !self.dispatch_line(line, &mut stdout)? {
                break;
            }
        }
        Ok(())
    }
}

enum ControlFlow {
    Continue,
    Exit,
}

fn main() -> io::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .init();

    let cli = Cli::parse();
    let console = Console::new();
    match &cli.script {
        Some(script) => console.run_script(script),
        None => console.run_interactive(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn parse_ok(line: &str) -> Command {
        parse(line).unwrap().unwrap()
    }

    #[test]
    fn parses_simple_commands() {
        assert_eq!(parse_ok("mkdir /a"), Command::Mkdir("/a".to_owned()));
        assert_eq!(parse_ok("touch f.txt"), Command::Touch("f.txt".to_owned()));
        assert_eq!(parse_ok("pwd"), Command::Pwd);
        assert_eq!(parse_ok("ls"), Command::Ls { path: None });
        assert_eq!(
            parse_ok("ls /docs"),
            Command::Ls {
                path: Some("/docs".to_owned())
            }
        );
        assert_eq!(
            parse_ok("mv a b"),
            Command::Mv {
                src: "a".to_owned(),
                dst: "b".to_owned()
            }
        );
        assert_eq!(parse_ok("exit"), Command::Exit);
    }

    #[test]
    fn blank_lines_are_ignored() {
        assert_eq!(parse("").unwrap(), None);
        assert_eq!(parse("   ").unwrap(), None);
    }

    #[test]
    fn parses_txn_flag() {
        let txn = TxnId::new(7).unwrap();
        assert_eq!(
            parse_ok("read f --txn 7"),
            Command::Read {
                path: "f".to_owned(),
                txn: Some(txn)
            }
        );
        // The display form round-trips too, anywhere in the argument list.
        assert_eq!(
            parse_ok("write f --txn txn#7 hello world"),
            Command::Write {
                path: "f".to_owned(),
                content: "hello world".to_owned(),
                txn: Some(txn)
            }
        );
    }

    #[test]
    fn write_joins_content_tokens() {
        assert_eq!(
            parse_ok("write notes.txt several words here"),
            Command::Write {
                path: "notes.txt".to_owned(),
                content: "several words here".to_owned(),
                txn: None
            }
        );
        assert!(parse("write notes.txt").is_err());
    }

    #[test]
    fn parses_isolation_tokens() {
        assert_eq!(
            parse_ok("txn_start"),
            Command::TxnStart(IsolationLevel::ReadCommitted)
        );
        assert_eq!(
            parse_ok("txn_start SNAPSHOT"),
            Command::TxnStart(IsolationLevel::Snapshot)
        );
        assert_eq!(
            parse_ok("txn_start READ_UNCOMMITTED"),
            Command::TxnStart(IsolationLevel::ReadUncommitted)
        );
        let err = parse("txn_start SERIALIZABLE").unwrap_err();
        assert!(err.contains("unknown isolation level"), "{err}");
    }

    #[test]
    fn rejects_malformed_input() {
        assert!(parse("mkdir").is_err());
        assert!(parse("mv onlyone").is_err());
        assert!(parse("read f --txn").is_err());
        assert!(parse("read f --txn banana").is_err());
        assert!(parse("frobnicate x").is_err());
    }

    #[test]
    fn scenario_through_the_console() {
        // S1 driven through the dispatcher, checking printed output. The
        // preceding auto-commit operations consume transaction ids too, so
        // the explicit transaction comes out as txn#3.
        let console = Console::new();
        let mut out = Vec::new();
        for line in [
            "touch a",
            "open a",
            "txn_start",
            "write a X --txn 3",
            "read a",
            "read a --txn 3",
            "txn_commit 3",
            "read a",
        ] {
            console.dispatch_line(line, &mut out).unwrap();
        }
        let output = String::from_utf8(out).unwrap();
        let lines: Vec<&str> = output.lines().collect();
        assert_eq!(
            lines,
            vec![
                "Opened: a",
                "Transaction started: txn#3",
                "Content written",
                "(empty file)",
                "X",
                "Transaction committed: txn#3",
                "X",
            ]
        );
    }

    #[test]
    fn console_surfaces_core_errors() {
        let console = Console::new();
        let mut out = Vec::new();
        console.dispatch_line("read missing", &mut out).unwrap();
        console.dispatch_line("txn_commit 42", &mut out).unwrap();
        let output = String::from_utf8(out).unwrap();
        assert!(output.contains("Error: no such file: '/missing'"));
        assert!(output.contains("Error: unknown transaction: txn#42"));
    }
}
