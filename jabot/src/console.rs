//! Operator console: line commands read from stdin while the loop runs.
//!
//! - `list` prints the online contacts
//! - `quit` closes the session
//! - `<jid> <text>` sends a chat message

use tokio::io::{AsyncBufRead, AsyncBufReadExt, AsyncWrite, AsyncWriteExt};

use crate::session::BotHandle;

/// One parsed console line.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ConsoleCommand {
    List,
    Quit,
    Send { to: String, text: String },
}

impl ConsoleCommand {
    /// Parse a line; `None` for blank or unrecognized input.
    pub fn parse(line: &str) -> Option<Self> {
        let line = line.trim();
        match line {
            "" => None,
            "list" => Some(Self::List),
            "quit" | "exit" => Some(Self::Quit),
            _ => {
                let (to, text) = line.split_once(char::is_whitespace)?;
                let text = text.trim();
                if !to.contains('@') || text.is_empty() {
                    return None;
                }
                Some(Self::Send {
                    to: to.to_string(),
                    text: text.to_string(),
                })
            }
        }
    }
}

/// Read commands from `input` until EOF or `quit`, writing feedback to `output`.
pub async fn run<R, W>(handle: BotHandle, input: R, mut output: W) -> std::io::Result<()>
where
    R: AsyncBufRead + Unpin,
    W: AsyncWrite + Unpin,
{
    let mut lines = input.lines();
    while let Some(line) = lines.next_line().await? {
        let Some(command) = ConsoleCommand::parse(&line) else {
            if !line.trim().is_empty() {
                output
                    .write_all(b"usage: list | quit | <jid> <text>\n")
                    .await?;
            }
            continue;
        };

        match command {
            ConsoleCommand::List => {
                let mut online = handle.list_online().await;
                online.sort_by(|a, b| a.identity.cmp(&b.identity));
                for contact in online {
                    output
                        .write_all(format!("{} ({})\n", contact.identity, contact.nick_name).as_bytes())
                        .await?;
                }
            }
            ConsoleCommand::Quit => {
                if let Err(e) = handle.close() {
                    tracing::warn!(error = %e, "Close request failed");
                }
                break;
            }
            ConsoleCommand::Send { to, text } => {
                if let Err(e) = handle.send_message(&to, &text) {
                    output.write_all(format!("send failed: {e}\n").as_bytes()).await?;
                }
            }
        }
        output.flush().await?;
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use test_case::test_case;

    #[test_case("list", Some(ConsoleCommand::List) ; "list")]
    #[test_case("  quit ", Some(ConsoleCommand::Quit) ; "quit")]
    #[test_case("", None ; "blank")]
    #[test_case("hello", None ; "single word")]
    #[test_case("nobody hello", None ; "no address")]
    #[test_case("amy@x.com   ", None ; "no text")]
    fn parse_lines(line: &str, expected: Option<ConsoleCommand>) {
        assert_eq!(ConsoleCommand::parse(line), expected);
    }

    #[test]
    fn parse_send_keeps_inner_spacing() {
        assert_eq!(
            ConsoleCommand::parse("amy@x.com  hi  there"),
            Some(ConsoleCommand::Send {
                to: "amy@x.com".into(),
                text: "hi  there".into(),
            })
        );
    }
}
