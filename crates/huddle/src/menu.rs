//! Interactive menu loop.
//!
//! ```text
//! 1. group chat
//! 2. direct messaging (DM)
//! 3. update username
//! 0. exit
//! ```
//!
//! Every mode reads one line at a time from the input; typing `exit`
//! leaves the mode, end-of-input leaves the client.

use std::ops::ControlFlow;

use tokio::io::{AsyncBufRead, AsyncBufReadExt, AsyncWrite, AsyncWriteExt};

use huddle_protocol::{is_valid_target, Command};

use crate::client::CommandSink;
use crate::error::Result;

const MENU: &str = "\n\t1. group chat\n\t2. direct messaging (DM)\n\t3. update username\n\t0. exit\n";

const EXIT: &str = "exit";

const MESSAGE_PROMPT: &str = ">>>>Enter your message here (exit to end):";

const TARGET_PROMPT: &str = ">>>>Enter the username you want to talk to (exit to end):";

const RENAME_PROMPT: &str = ">>>>Enter your new username:";

/// A top-level menu selection.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MenuChoice {
    GroupChat,
    DirectMessage,
    Rename,
    Exit,
}

impl MenuChoice {
    /// Parses a selection from the first character of `input`.
    pub fn parse(input: &str) -> Option<Self> {
        match input.chars().next()? {
            '1' => Some(Self::GroupChat),
            '2' => Some(Self::DirectMessage),
            '3' => Some(Self::Rename),
            '0' => Some(Self::Exit),
            _ => None,
        }
    }
}

/// Menu state machine over an input, a prompt output and a command sink.
pub struct Menu<I, O, W> {
    input: I,
    output: O,
    sink: CommandSink<W>,
}

impl<I, O, W> Menu<I, O, W>
where
    I: AsyncBufRead + Unpin,
    O: AsyncWrite + Unpin,
    W: AsyncWrite + Unpin,
{
    pub fn new(input: I, output: O, sink: CommandSink<W>) -> Self {
        Self {
            input,
            output,
            sink,
        }
    }

    /// Runs until the user picks `0` or the input ends.
    pub async fn run(&mut self) -> Result<()> {
        loop {
            let Some(choice) = self.choose().await? else {
                return Ok(());
            };

            let flow = match choice {
                MenuChoice::Exit => return Ok(()),
                MenuChoice::GroupChat => {
                    self.say("group chat starting...").await?;
                    self.group_chat().await?
                }
                MenuChoice::DirectMessage => {
                    self.say("DM starting...").await?;
                    self.direct_messages().await?
                }
                MenuChoice::Rename => {
                    self.say("updating username...").await?;
                    self.rename().await?
                }
            };

            if flow.is_break() {
                return Ok(());
            }
        }
    }

    pub fn into_inner(self) -> (I, O, CommandSink<W>) {
        (self.input, self.output, self.sink)
    }

    /// Shows the menu until a valid choice is made. `None` on end-of-input.
    async fn choose(&mut self) -> Result<Option<MenuChoice>> {
        loop {
            let Some(input) = self.prompt(MENU).await? else {
                return Ok(None);
            };
            match MenuChoice::parse(&input) {
                Some(choice) => return Ok(Some(choice)),
                None => self.say("invalid flag!").await?,
            }
        }
    }

    async fn group_chat(&mut self) -> Result<ControlFlow<()>> {
        loop {
            let Some(line) = self.prompt(MESSAGE_PROMPT).await? else {
                return Ok(ControlFlow::Break(()));
            };
            if line == EXIT {
                return Ok(ControlFlow::Continue(()));
            }
            if let Some(command) = Command::parse(&line) {
                self.sink.send(&command).await?;
            }
        }
    }

    async fn direct_messages(&mut self) -> Result<ControlFlow<()>> {
        self.sink.send(&Command::Who).await?;

        loop {
            let Some(target) = self.prompt(TARGET_PROMPT).await? else {
                return Ok(ControlFlow::Break(()));
            };
            if target == EXIT {
                return Ok(ControlFlow::Continue(()));
            }
            if target.is_empty() {
                continue;
            }
            if !is_valid_target(&target) {
                self.say(&format!("invalid username: {target}")).await?;
                continue;
            }

            if self.chat_with(&target).await?.is_break() {
                return Ok(ControlFlow::Break(()));
            }
        }
    }

    async fn chat_with(&mut self, target: &str) -> Result<ControlFlow<()>> {
        loop {
            let Some(body) = self.prompt(MESSAGE_PROMPT).await? else {
                return Ok(ControlFlow::Break(()));
            };
            if body == EXIT {
                return Ok(ControlFlow::Continue(()));
            }
            // Empty bodies are skipped, a valid target cannot fail here
            if let Ok(command) = Command::direct(target, body) {
                self.sink.send(&command).await?;
            }
        }
    }

    async fn rename(&mut self) -> Result<ControlFlow<()>> {
        let Some(name) = self.prompt(RENAME_PROMPT).await? else {
            return Ok(ControlFlow::Break(()));
        };
        self.sink.send(&Command::Rename(name)).await?;
        Ok(ControlFlow::Continue(()))
    }

    /// Prints `text` and reads one line. `None` on end-of-input.
    async fn prompt(&mut self, text: &str) -> Result<Option<String>> {
        self.say(text).await?;

        let mut line = String::new();
        if self.input.read_line(&mut line).await? == 0 {
            return Ok(None);
        }
        let trimmed = line.trim_end_matches('\n').trim_end_matches('\r');
        Ok(Some(trimmed.to_string()))
    }

    async fn say(&mut self, text: &str) -> Result<()> {
        self.output.write_all(text.as_bytes()).await?;
        self.output.write_all(b"\n").await?;
        self.output.flush().await?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    /// Runs the menu over `input`, returning (prompt output, bytes sent).
    async fn run_menu(input: &str) -> (String, String) {
        let mut menu = Menu::new(input.as_bytes(), Vec::new(), CommandSink::new(Vec::new()));
        menu.run().await.unwrap();
        let (_, output, sink) = menu.into_inner();
        (
            String::from_utf8(output).unwrap(),
            String::from_utf8(sink.into_inner()).unwrap(),
        )
    }

    #[test]
    fn test_menu_choice_parse() {
        assert_eq!(MenuChoice::parse("1"), Some(MenuChoice::GroupChat));
        assert_eq!(MenuChoice::parse("2"), Some(MenuChoice::DirectMessage));
        assert_eq!(MenuChoice::parse("3 please"), Some(MenuChoice::Rename));
        assert_eq!(MenuChoice::parse("0"), Some(MenuChoice::Exit));
        assert_eq!(MenuChoice::parse(""), None);
        assert_eq!(MenuChoice::parse("4"), None);
        assert_eq!(MenuChoice::parse("x"), None);
    }

    #[tokio::test]
    async fn test_group_chat_sends_lines_until_exit() {
        let (output, sent) = run_menu("1\nhello\n\nwho\nexit\n0\n").await;

        assert_eq!(sent, "hello\nwho\n");
        assert!(output.contains("group chat starting..."));
    }

    #[tokio::test]
    async fn test_direct_messages_list_then_send() {
        let (output, sent) = run_menu("2\nBob\nhi\n\nthere\nexit\nexit\n0\n").await;

        assert_eq!(sent, "who\n{to=Bob}hi\n{to=Bob}there\n");
        assert!(output.contains(TARGET_PROMPT));
    }

    #[tokio::test]
    async fn test_direct_messages_reject_unaddressable_target() {
        let (output, sent) = run_menu("2\nbad name\nBob\nhi\nexit\nexit\n0\n").await;

        assert!(output.contains("invalid username: bad name"));
        assert_eq!(sent, "who\n{to=Bob}hi\n");
    }

    #[tokio::test]
    async fn test_rename_sends_request() {
        let (_, sent) = run_menu("3\nAlice\n0\n").await;
        assert_eq!(sent, "{rename}Alice\n");
    }

    #[tokio::test]
    async fn test_invalid_choice_reprompts() {
        let (output, sent) = run_menu("9\n\n0\n").await;

        assert_eq!(output.matches("invalid flag!").count(), 2);
        assert!(sent.is_empty());
    }

    #[tokio::test]
    async fn test_end_of_input_exits_mid_mode() {
        let (_, sent) = run_menu("1\nhello\r\nlast").await;
        assert_eq!(sent, "hello\nlast\n");
    }
}
