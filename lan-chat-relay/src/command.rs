//! Slash commands typed by chat users.

use crate::{envelope::Target, error::CommandError};

pub const SIGIL: char = '/';

pub const HELP: &str = "/list_users - list of users in the chat room\n\
/whisper <username> <message> - send private message\n\
/help - list of commands\n\
/list_files - list of files in your folder\n\
/change_incoming_folder <folder> - change your download location to [folder]\n\
/send all <file_name> - send file to everyone\n\
/send <username> <file_name> - send file to user named [username]";

const WHISPER_USAGE: &str = "/whisper <username> <message>";
const SEND_USAGE: &str = "/send <all|username> <file_name>";
const CHANGE_FOLDER_USAGE: &str = "/change_incoming_folder <folder>";

#[derive(Debug, PartialEq, Eq)]
pub enum Command {
    Whisper { username: String, message: String },
    ListUsers,
    ListFiles,
    Send { target: Target, file_name: String },
    ChangeIncomingFolder { folder: String },
    Help,
}

impl Command {
    /// Parses a line that starts with [`SIGIL`].
    ///
    /// Tokens are split on single spaces, so repeated spaces inside a
    /// message survive the round trip.
    pub fn parse(line: &str) -> Result<Self, CommandError> {
        let tokens: Vec<&str> = line.split(' ').collect();
        let name = tokens.first().copied().unwrap_or_default();
        let rest = |from: usize| tokens.get(from..).map(|words| words.join(" "));

        match name {
            "/whisper" => {
                let username = non_empty(tokens.get(1).copied())
                    .ok_or(CommandError::Usage(WHISPER_USAGE))?;
                let message = rest(2)
                    .filter(|message| !message.is_empty())
                    .ok_or(CommandError::Usage(WHISPER_USAGE))?;
                Ok(Command::Whisper {
                    username: username.to_string(),
                    message,
                })
            }
            "/list_users" => Ok(Command::ListUsers),
            "/list_files" => Ok(Command::ListFiles),
            "/send" => {
                let target = non_empty(tokens.get(1).copied())
                    .ok_or(CommandError::Usage(SEND_USAGE))?;
                let file_name = rest(2)
                    .filter(|name| !name.is_empty())
                    .ok_or(CommandError::Usage(SEND_USAGE))?;
                Ok(Command::Send {
                    target: Target::parse(target),
                    file_name,
                })
            }
            "/change_incoming_folder" => {
                let folder = rest(1)
                    .filter(|folder| !folder.is_empty())
                    .ok_or(CommandError::Usage(CHANGE_FOLDER_USAGE))?;
                Ok(Command::ChangeIncomingFolder { folder })
            }
            "/help" => Ok(Command::Help),
            other => Err(CommandError::Unknown(other.to_string())),
        }
    }
}

fn non_empty(token: Option<&str>) -> Option<&str> {
    token.filter(|token| !token.is_empty())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn whisper_rejoins_the_message() {
        assert_eq!(
            Command::parse("/whisper bob see you  at noon"),
            Ok(Command::Whisper {
                username: "bob".into(),
                message: "see you  at noon".into(),
            })
        );
    }

    #[test]
    fn whisper_without_arguments_is_a_usage_error() {
        assert_eq!(
            Command::parse("/whisper"),
            Err(CommandError::Usage(WHISPER_USAGE))
        );
        assert_eq!(
            Command::parse("/whisper bob"),
            Err(CommandError::Usage(WHISPER_USAGE))
        );
        assert_eq!(
            Command::parse("/whisper  hi"),
            Err(CommandError::Usage(WHISPER_USAGE))
        );
    }

    #[test]
    fn send_parses_target_and_file_name() {
        assert_eq!(
            Command::parse("/send all holiday photo.jpg"),
            Ok(Command::Send {
                target: Target::All,
                file_name: "holiday photo.jpg".into(),
            })
        );
        assert_eq!(
            Command::parse("/send bob a.txt"),
            Ok(Command::Send {
                target: Target::User("bob".into()),
                file_name: "a.txt".into(),
            })
        );
        assert_eq!(
            Command::parse("/send bob"),
            Err(CommandError::Usage(SEND_USAGE))
        );
    }

    #[test]
    fn change_folder_requires_a_path() {
        assert_eq!(
            Command::parse("/change_incoming_folder downloads/new"),
            Ok(Command::ChangeIncomingFolder {
                folder: "downloads/new".into()
            })
        );
        assert_eq!(
            Command::parse("/change_incoming_folder"),
            Err(CommandError::Usage(CHANGE_FOLDER_USAGE))
        );
    }

    #[test]
    fn commands_are_case_sensitive() {
        assert_eq!(Command::parse("/help"), Ok(Command::Help));
        assert_eq!(Command::parse("/list_users"), Ok(Command::ListUsers));
        assert_eq!(Command::parse("/list_files"), Ok(Command::ListFiles));
        assert_eq!(
            Command::parse("/HELP"),
            Err(CommandError::Unknown("/HELP".into()))
        );
        assert!(matches!(
            Command::parse("/biday_prithibi"),
            Err(CommandError::Unknown(_))
        ));
    }
}
