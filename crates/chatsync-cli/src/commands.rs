use std::path::PathBuf;

use anyhow::{Context, Result, bail};

/// One line typed in interactive mode.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Command {
    /// Anything that is not a slash command is sent as a message.
    Send(String),
    Attach(Vec<PathBuf>),
    Remove(u64),
    Stop,
    New,
    List,
    /// Conversation id, or its 1-based position in `/list`.
    Select(String),
    Delete(String),
    Status,
    Help,
    Quit,
}

pub const HELP: &str = "\
Type a message to send it. Commands:
  /attach <path>...   upload files for the next message
  /remove <n>         drop attachment #n
  /stop               stop the response being generated
  /new                start a new conversation
  /list               show conversations
  /select <n|id>      switch conversation
  /delete <n|id>      delete a conversation
  /status             show uploads and generation state
  /quit               exit";

pub fn parse(line: &str) -> Result<Command> {
    let trimmed = line.trim();
    let Some(rest) = trimmed.strip_prefix('/') else {
        return Ok(Command::Send(line.to_string()));
    };

    let mut parts = rest.split_whitespace();
    let name = parts.next().unwrap_or_default();
    let args: Vec<&str> = parts.collect();

    let command = match name {
        "attach" | "a" => {
            if args.is_empty() {
                bail!("/attach needs at least one path");
            }
            Command::Attach(args.iter().map(PathBuf::from).collect())
        }
        "remove" | "rm" => {
            let id = single_arg(name, &args)?;
            let id = id
                .trim_start_matches('#')
                .parse()
                .with_context(|| format!("Not an attachment number: {id}"))?;
            Command::Remove(id)
        }
        "stop" => Command::Stop,
        "new" => Command::New,
        "list" | "ls" => Command::List,
        "select" | "s" => Command::Select(single_arg(name, &args)?.to_string()),
        "delete" => Command::Delete(single_arg(name, &args)?.to_string()),
        "status" => Command::Status,
        "help" | "?" => Command::Help,
        "quit" | "exit" | "q" => Command::Quit,
        other => bail!("Unknown command /{other}, try /help"),
    };
    Ok(command)
}

fn single_arg<'a>(name: &str, args: &[&'a str]) -> Result<&'a str> {
    match args {
        [arg] => Ok(arg),
        _ => bail!("/{name} takes exactly one argument"),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_plain_text_is_sent_verbatim() {
        assert_eq!(parse("  hello there ").unwrap(), Command::Send("  hello there ".to_string()));
        assert_eq!(parse("").unwrap(), Command::Send(String::new()));
    }

    #[test]
    fn test_attach_multiple_paths() {
        assert_eq!(
            parse("/attach a.png docs/b.pdf").unwrap(),
            Command::Attach(vec![PathBuf::from("a.png"), PathBuf::from("docs/b.pdf")])
        );
        assert!(parse("/attach").is_err());
    }

    #[test]
    fn test_remove_accepts_hash_prefix() {
        assert_eq!(parse("/remove #3").unwrap(), Command::Remove(3));
        assert_eq!(parse("/rm 7").unwrap(), Command::Remove(7));
        assert!(parse("/remove three").is_err());
    }

    #[test]
    fn test_select_requires_one_argument() {
        assert_eq!(parse("/select 2").unwrap(), Command::Select("2".to_string()));
        assert!(parse("/select").is_err());
        assert!(parse("/select 1 2").is_err());
    }

    #[test]
    fn test_unknown_command() {
        let err = parse("/frobnicate").unwrap_err();
        assert!(err.to_string().contains("/frobnicate"));
    }

    #[test]
    fn test_simple_commands() {
        assert_eq!(parse("/stop").unwrap(), Command::Stop);
        assert_eq!(parse("/new").unwrap(), Command::New);
        assert_eq!(parse("/ls").unwrap(), Command::List);
        assert_eq!(parse("/status").unwrap(), Command::Status);
        assert_eq!(parse("/q").unwrap(), Command::Quit);
    }
}
