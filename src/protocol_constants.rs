pub const ARRAY_PREFIX: &str = "*";
pub const BULK_STRING_PREFIX: &str = "$";
pub const SIMPLE_STRING_PREFIX: &str = "+";
pub const ERROR_PREFIX: &str = "-";
pub const INTEGER_PREFIX: &str = ":";
pub const CRLF: &str = "\r\n";
pub const NULL_BULK_STRING: &str = "$-1\r\n";

pub const PING_COMMAND: &str = "PING";
pub const ECHO_COMMAND: &str = "ECHO";
pub const GET_COMMAND: &str = "GET";
pub const SET_COMMAND: &str = "SET";
pub const DEL_COMMAND: &str = "DEL";
pub const INCR_COMMAND: &str = "INCR";
pub const KEYS_COMMAND: &str = "KEYS";
pub const CONFIG_COMMAND: &str = "CONFIG";
pub const INFO_COMMAND: &str = "INFO";
pub const REPLCONF_COMMAND: &str = "REPLCONF";
pub const PSYNC_COMMAND: &str = "PSYNC";
pub const WAIT_COMMAND: &str = "WAIT";

pub const PX_OPTION: &str = "PX";
pub const EX_OPTION: &str = "EX";

pub const CONFIG_GET_OPTION: &str = "GET";

pub const REPLCONF_LISTENING_PORT: &str = "listening-port";
pub const REPLCONF_CAPA: &str = "capa";
pub const REPLCONF_ACK: &str = "ack";
pub const REPLCONF_GETACK: &str = "getack";

pub const OPCODE_START_DB: u8 = 0xFE;
pub const OPCODE_EXPIRETIME_MS: u8 = 0xFC;
pub const OPCODE_EXPIRETIME_S: u8 = 0xFD;
pub const OPCODE_META: u8 = 0xFA;
pub const OPCODE_SIZE: u8 = 0xFB;
pub const OPCODE_EOF: u8 = 0xFF;
pub const OPCODE_STRING: u8 = 0x00;
pub const MAGIC_NUMBER: &[u8] = b"REDIS";
pub const RDB_VERSION: &[u8] = b"0011";
