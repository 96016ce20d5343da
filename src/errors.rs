use thiserror::Error;

/// A framing violation on the wire. The connection replies once and closes.
#[derive(Error, Debug, PartialEq, Eq)]
pub enum ProtocolError {
    #[error("protocol error")]
    Malformed,
}

#[derive(Error, Debug, PartialEq, Eq)]
pub enum CommandError {
    #[error("unknown command '{0}'")]
    UnknownCommand(String),
    #[error("wrong number of arguments for '{0}' command")]
    WrongArgCount(String),
    #[error("value is not an integer or out of range")]
    NotInteger,
    #[error("unknown REPLCONF subcommand")]
    UnknownReplconfSubcommand,
    #[error("partial resync not supported")]
    PartialResync,
}
