use crate::config::ServerConfig;
use crate::errors::CommandError;
use crate::keyspace::Keyspace;
use crate::protocol_constants::*;
use crate::replication_config::ReplicationConfig;
use crate::value_entry::ValueEntry;
use bytes::Bytes;

#[derive(Debug, PartialEq, Eq)]
pub enum Command {
    Ping,
    Echo(Bytes),
    Get(Bytes),
    Set {
        key: Bytes,
        value: Bytes,
        px: Option<u64>,
        ex: Option<u64>,
    },
    Del(Vec<Bytes>),
    Incr(Bytes),
    Keys(Bytes),
    Config(ConfigCommand),
    Info(Option<String>),
    Replconf(Vec<Bytes>),
    Psync { replid: String, offset: i64 },
    Wait { num_replicas: usize, timeout_ms: u64 },
}

#[derive(Debug, PartialEq, Eq)]
pub enum ConfigCommand {
    Get(String),
}

/// One reply frame, or deliberately none. `Raw` is for pre-framed
/// payloads such as the FULLRESYNC snapshot, which must go out
/// without the usual bulk terminator.
#[derive(Debug, PartialEq, Eq)]
pub enum CommandResponse {
    Simple(String),
    Error(String),
    Integer(i64),
    Bulk(Bytes),
    NullBulk,
    Array(Vec<Bytes>),
    Raw(Vec<u8>),
    None,
}

impl CommandResponse {
    pub fn into_bytes(self) -> Vec<u8> {
        match self {
            CommandResponse::Simple(text) => {
                format!("{}{}{}", SIMPLE_STRING_PREFIX, text, CRLF).into_bytes()
            }
            CommandResponse::Error(message) => {
                format!("{}{}{}", ERROR_PREFIX, message, CRLF).into_bytes()
            }
            CommandResponse::Integer(value) => {
                format!("{}{}{}", INTEGER_PREFIX, value, CRLF).into_bytes()
            }
            CommandResponse::Bulk(data) => {
                let mut out =
                    format!("{}{}{}", BULK_STRING_PREFIX, data.len(), CRLF).into_bytes();
                out.extend_from_slice(&data);
                out.extend_from_slice(CRLF.as_bytes());
                out
            }
            CommandResponse::NullBulk => NULL_BULK_STRING.as_bytes().to_vec(),
            CommandResponse::Array(items) => {
                let mut out = format!("{}{}{}", ARRAY_PREFIX, items.len(), CRLF).into_bytes();
                for item in items {
                    out.extend_from_slice(
                        format!("{}{}{}", BULK_STRING_PREFIX, item.len(), CRLF).as_bytes(),
                    );
                    out.extend_from_slice(&item);
                    out.extend_from_slice(CRLF.as_bytes());
                }
                out
            }
            CommandResponse::Raw(bytes) => bytes,
            CommandResponse::None => Vec::new(),
        }
    }
}

impl Command {
    /// Maps parsed frame arguments onto a command. The name is matched
    /// case-insensitively; argument octets are taken as they came.
    pub fn parse(args: &[Bytes]) -> Result<Command, CommandError> {
        let name = String::from_utf8_lossy(&args[0]).to_uppercase();
        match name.as_str() {
            PING_COMMAND => check_args_len(args, 1, PING_COMMAND).map(|_| Command::Ping),
            ECHO_COMMAND => {
                check_args_len(args, 2, ECHO_COMMAND)?;
                Ok(Command::Echo(args[1].clone()))
            }
            GET_COMMAND => {
                check_args_len(args, 2, GET_COMMAND)?;
                Ok(Command::Get(args[1].clone()))
            }
            SET_COMMAND => parse_set(args),
            DEL_COMMAND => {
                if args.len() < 2 {
                    return Err(wrong_args(DEL_COMMAND));
                }
                Ok(Command::Del(args[1..].to_vec()))
            }
            INCR_COMMAND => {
                check_args_len(args, 2, INCR_COMMAND)?;
                Ok(Command::Incr(args[1].clone()))
            }
            KEYS_COMMAND => {
                check_args_len(args, 2, KEYS_COMMAND)?;
                Ok(Command::Keys(args[1].clone()))
            }
            CONFIG_COMMAND => parse_config(args),
            INFO_COMMAND => match args.len() {
                1 => Ok(Command::Info(None)),
                2 => Ok(Command::Info(Some(
                    String::from_utf8_lossy(&args[1]).to_lowercase(),
                ))),
                _ => Err(wrong_args(INFO_COMMAND)),
            },
            REPLCONF_COMMAND => {
                if args.len() < 3 {
                    return Err(wrong_args(REPLCONF_COMMAND));
                }
                Ok(Command::Replconf(args[1..].to_vec()))
            }
            PSYNC_COMMAND => {
                check_args_len(args, 3, PSYNC_COMMAND)?;
                let replid = String::from_utf8_lossy(&args[1]).into_owned();
                let offset = String::from_utf8_lossy(&args[2])
                    .parse::<i64>()
                    .map_err(|_| CommandError::NotInteger)?;
                Ok(Command::Psync { replid, offset })
            }
            WAIT_COMMAND => {
                check_args_len(args, 3, WAIT_COMMAND)?;
                let num_replicas = String::from_utf8_lossy(&args[1])
                    .parse::<usize>()
                    .map_err(|_| CommandError::NotInteger)?;
                let timeout_ms = String::from_utf8_lossy(&args[2])
                    .parse::<u64>()
                    .map_err(|_| CommandError::NotInteger)?;
                Ok(Command::Wait {
                    num_replicas,
                    timeout_ms,
                })
            }
            _ => Err(CommandError::UnknownCommand(name.to_lowercase())),
        }
    }

    /// Commands that mutate the keyspace and therefore join the
    /// replication stream.
    pub fn is_write(&self) -> bool {
        matches!(
            self,
            Command::Set { .. } | Command::Del(_) | Command::Incr(_)
        )
    }

    pub async fn execute(
        &self,
        keyspace: &Keyspace,
        config: &ServerConfig,
        replication: &ReplicationConfig,
    ) -> Result<CommandResponse, CommandError> {
        match self {
            Command::Ping => Ok(CommandResponse::Simple("PONG".to_string())),
            Command::Echo(message) => Ok(CommandResponse::Bulk(message.clone())),
            Command::Get(key) => match keyspace.get(key).await {
                Some(value) => Ok(CommandResponse::Bulk(value)),
                None => Ok(CommandResponse::NullBulk),
            },
            Command::Set { key, value, px, ex } => {
                let expiration_ms = match (px, ex) {
                    (Some(ms), _) => Some(*ms),
                    (None, Some(s)) => Some(s.saturating_mul(1000)),
                    _ => None,
                };
                keyspace
                    .set(
                        key.clone(),
                        ValueEntry::new_relative(value.clone(), expiration_ms),
                    )
                    .await;
                Ok(CommandResponse::Simple("OK".to_string()))
            }
            Command::Del(keys) => {
                let removed = keyspace.del(keys).await;
                Ok(CommandResponse::Integer(removed as i64))
            }
            Command::Incr(key) => {
                let value = keyspace.incr(key).await?;
                Ok(CommandResponse::Integer(value))
            }
            Command::Keys(_pattern) => {
                // only the universal pattern is supported; anything
                // else enumerates like `*` as well
                Ok(CommandResponse::Array(keyspace.keys().await))
            }
            Command::Config(ConfigCommand::Get(name)) => match config.get(name) {
                Some(value) => Ok(CommandResponse::Array(vec![
                    Bytes::from(name.clone()),
                    Bytes::from(value),
                ])),
                None => Ok(CommandResponse::Array(Vec::new())),
            },
            Command::Info(section) => match section.as_deref() {
                None | Some("replication") => Ok(CommandResponse::Bulk(Bytes::from(
                    replication.replication_info().await,
                ))),
                Some(_) => Ok(CommandResponse::Bulk(Bytes::new())),
            },
            Command::Replconf(args) => {
                let sub = String::from_utf8_lossy(&args[0]).to_lowercase();
                match sub.as_str() {
                    REPLCONF_LISTENING_PORT | REPLCONF_CAPA | REPLCONF_ACK => {
                        Ok(CommandResponse::Simple("OK".to_string()))
                    }
                    // GETACK only means something from leader to
                    // follower; on a client connection it is ignored
                    REPLCONF_GETACK => Ok(CommandResponse::None),
                    _ => Err(CommandError::UnknownReplconfSubcommand),
                }
            }
            Command::Wait {
                num_replicas,
                timeout_ms,
            } => {
                let count = replication.wait_for_acks(*num_replicas, *timeout_ms).await;
                Ok(CommandResponse::Integer(count as i64))
            }
            // PSYNC owns the connection it arrives on; the connection
            // layer answers it before execute is ever reached
            Command::Psync { .. } => Err(CommandError::PartialResync),
        }
    }
}

fn wrong_args(name: &str) -> CommandError {
    CommandError::WrongArgCount(name.to_lowercase())
}

fn check_args_len(args: &[Bytes], expected_len: usize, name: &str) -> Result<(), CommandError> {
    if args.len() != expected_len {
        Err(wrong_args(name))
    } else {
        Ok(())
    }
}

fn parse_set(args: &[Bytes]) -> Result<Command, CommandError> {
    if args.len() < 3 {
        return Err(wrong_args(SET_COMMAND));
    }

    let key = args[1].clone();
    let value = args[2].clone();
    let mut px = None;
    let mut ex = None;

    let mut arg_index = 3;
    while arg_index < args.len() {
        let option = String::from_utf8_lossy(&args[arg_index]).to_uppercase();
        match option.as_str() {
            PX_OPTION => {
                px = Some(parse_option_value(args, arg_index)?);
                arg_index += 2;
            }
            EX_OPTION => {
                ex = Some(parse_option_value(args, arg_index)?);
                arg_index += 2;
            }
            _ => return Err(wrong_args(SET_COMMAND)),
        }
    }

    Ok(Command::Set { key, value, px, ex })
}

fn parse_option_value(args: &[Bytes], index: usize) -> Result<u64, CommandError> {
    match args.get(index + 1) {
        Some(value) => String::from_utf8_lossy(value)
            .parse::<u64>()
            .map_err(|_| CommandError::NotInteger),
        None => Err(wrong_args(SET_COMMAND)),
    }
}

fn parse_config(args: &[Bytes]) -> Result<Command, CommandError> {
    if args.len() < 3 {
        return Err(wrong_args(CONFIG_COMMAND));
    }
    let sub = String::from_utf8_lossy(&args[1]).to_uppercase();
    if sub != CONFIG_GET_OPTION {
        return Err(wrong_args(CONFIG_COMMAND));
    }
    Ok(Command::Config(ConfigCommand::Get(
        String::from_utf8_lossy(&args[2]).to_lowercase(),
    )))
}
