//! Positional parameter encoding of commands.
//!
//! Every command kind writes a fixed sequence of `Param`s under its command id.
//! Decoding checks the id and each parameter's type; any mismatch is a
//! protocol fault.

use std::collections::BTreeMap;

use shoal_types::{Flags, Key, Metadata, ShoalError, Value};

use crate::command::Command;
use crate::payload::Payload;
use crate::read::{ClusteredGetCommand, GetKeyValueCommand};
use crate::tx::{
    CommitCommand, GlobalTransaction, PrepareCommand, RollbackCommand, TxCompletionNotificationCommand,
};
use crate::write::{ClearCommand, PutKeyValueCommand, PutMapCommand, RemoveCommand, ReplaceCommand};

#[derive(Debug, Clone, PartialEq, serde::Serialize, serde::Deserialize)]
pub enum Param {
    Key(Key),
    Bytes(Value),
    OptBytes(Option<Value>),
    Payload(Payload),
    Metadata(Metadata),
    Bool(bool),
    Flags(Flags),
    Map(BTreeMap<Key, Value>),
    Gtx(GlobalTransaction),
    Commands(Vec<WireCommand>),
}

impl Param {
    fn type_name(&self) -> &'static str {
        match self {
            Param::Key(_) => "key",
            Param::Bytes(_) => "bytes",
            Param::OptBytes(_) => "optional bytes",
            Param::Payload(_) => "payload",
            Param::Metadata(_) => "metadata",
            Param::Bool(_) => "bool",
            Param::Flags(_) => "flags",
            Param::Map(_) => "map",
            Param::Gtx(_) => "transaction",
            Param::Commands(_) => "commands",
        }
    }
}

#[derive(Debug, Clone, PartialEq, serde::Serialize, serde::Deserialize)]
pub struct WireCommand {
    pub command_id: u8,
    pub params: Vec<Param>,
}

pub fn encode(cmd: &Command) -> Result<Vec<u8>, ShoalError> {
    bincode::serde::encode_to_vec(cmd.to_wire(), bincode::config::standard())
        .map_err(|e| ShoalError::Serialization(e.to_string()))
}

pub fn decode(bytes: &[u8]) -> Result<Command, ShoalError> {
    let (wire, _): (WireCommand, usize) =
        bincode::serde::decode_from_slice(bytes, bincode::config::standard())
            .map_err(|e| ShoalError::Protocol(format!("undecodable command: {e}")))?;
    Command::from_wire(wire)
}

// ---------------------------------------------------------------------------
// Reader
// ---------------------------------------------------------------------------

struct Reader {
    command_id: u8,
    params: std::vec::IntoIter<Param>,
}

macro_rules! take {
    ($name:ident, $variant:ident, $ty:ty) => {
        fn $name(&mut self) -> Result<$ty, ShoalError> {
            match self.params.next() {
                Some(Param::$variant(v)) => Ok(v),
                Some(other) => Err(ShoalError::Protocol(format!(
                    "command {}: expected {}, found {}",
                    self.command_id,
                    stringify!($name),
                    other.type_name()
                ))),
                None => Err(ShoalError::Protocol(format!(
                    "command {}: missing {}",
                    self.command_id,
                    stringify!($name)
                ))),
            }
        }
    };
}

impl Reader {
    fn open(expected: u8, actual: u8, params: Vec<Param>) -> Result<Self, ShoalError> {
        if expected != actual {
            return Err(ShoalError::CommandIdMismatch { expected, actual });
        }
        Ok(Reader { command_id: actual, params: params.into_iter() })
    }

    take!(key, Key, Key);
    take!(bytes, Bytes, Value);
    take!(opt_bytes, OptBytes, Option<Value>);
    take!(payload, Payload, Payload);
    take!(metadata, Metadata, Metadata);
    take!(bool, Bool, bool);
    take!(flags, Flags, Flags);
    take!(map, Map, BTreeMap<Key, Value>);
    take!(gtx, Gtx, GlobalTransaction);
    take!(commands, Commands, Vec<WireCommand>);

    fn finish(mut self) -> Result<(), ShoalError> {
        match self.params.next() {
            None => Ok(()),
            Some(extra) => Err(ShoalError::Protocol(format!(
                "command {}: unexpected trailing {}",
                self.command_id,
                extra.type_name()
            ))),
        }
    }
}

// ---------------------------------------------------------------------------
// Per-command parameter lists
// ---------------------------------------------------------------------------

impl GetKeyValueCommand {
    pub fn parameters(&self) -> Vec<Param> {
        vec![Param::Key(self.key.clone()), Param::Flags(self.flags.remotable())]
    }

    pub fn from_parameters(command_id: u8, params: Vec<Param>) -> Result<Self, ShoalError> {
        let mut r = Reader::open(Self::COMMAND_ID, command_id, params)?;
        let cmd = GetKeyValueCommand { key: r.key()?, flags: r.flags()? };
        r.finish()?;
        Ok(cmd)
    }
}

impl ClusteredGetCommand {
    pub fn parameters(&self) -> Vec<Param> {
        vec![Param::Key(self.key.clone()), Param::Flags(self.flags.remotable())]
    }

    pub fn from_parameters(command_id: u8, params: Vec<Param>) -> Result<Self, ShoalError> {
        let mut r = Reader::open(Self::COMMAND_ID, command_id, params)?;
        let cmd = ClusteredGetCommand { key: r.key()?, flags: r.flags()? };
        r.finish()?;
        Ok(cmd)
    }
}

impl PutKeyValueCommand {
    /// `[key, payload, metadata, put_if_absent, ignore_previous_value, flags]`
    pub fn parameters(&self) -> Vec<Param> {
        vec![
            Param::Key(self.key.clone()),
            Param::Payload(self.payload.clone()),
            Param::Metadata(self.metadata),
            Param::Bool(self.put_if_absent),
            Param::Bool(self.ignore_previous_value),
            Param::Flags(self.flags.remotable()),
        ]
    }

    pub fn from_parameters(command_id: u8, params: Vec<Param>) -> Result<Self, ShoalError> {
        let mut r = Reader::open(Self::COMMAND_ID, command_id, params)?;
        let cmd = PutKeyValueCommand {
            key: r.key()?,
            payload: r.payload()?,
            metadata: r.metadata()?,
            put_if_absent: r.bool()?,
            ignore_previous_value: r.bool()?,
            flags: r.flags()?,
            successful: true,
        };
        r.finish()?;
        Ok(cmd)
    }
}

impl PutMapCommand {
    pub fn parameters(&self) -> Vec<Param> {
        vec![
            Param::Map(self.map.clone()),
            Param::Metadata(self.metadata),
            Param::Flags(self.flags.remotable()),
        ]
    }

    pub fn from_parameters(command_id: u8, params: Vec<Param>) -> Result<Self, ShoalError> {
        let mut r = Reader::open(Self::COMMAND_ID, command_id, params)?;
        let cmd = PutMapCommand { map: r.map()?, metadata: r.metadata()?, flags: r.flags()? };
        r.finish()?;
        Ok(cmd)
    }
}

impl RemoveCommand {
    pub fn parameters(&self) -> Vec<Param> {
        vec![
            Param::Key(self.key.clone()),
            Param::OptBytes(self.value.clone()),
            Param::Flags(self.flags.remotable()),
        ]
    }

    pub fn from_parameters(command_id: u8, params: Vec<Param>) -> Result<Self, ShoalError> {
        let mut r = Reader::open(Self::COMMAND_ID, command_id, params)?;
        let cmd = RemoveCommand {
            key: r.key()?,
            value: r.opt_bytes()?,
            flags: r.flags()?,
            successful: true,
        };
        r.finish()?;
        Ok(cmd)
    }
}

impl ReplaceCommand {
    pub fn parameters(&self) -> Vec<Param> {
        vec![
            Param::Key(self.key.clone()),
            Param::OptBytes(self.old_value.clone()),
            Param::Bytes(self.new_value.clone()),
            Param::Metadata(self.metadata),
            Param::Flags(self.flags.remotable()),
        ]
    }

    pub fn from_parameters(command_id: u8, params: Vec<Param>) -> Result<Self, ShoalError> {
        let mut r = Reader::open(Self::COMMAND_ID, command_id, params)?;
        let cmd = ReplaceCommand {
            key: r.key()?,
            old_value: r.opt_bytes()?,
            new_value: r.bytes()?,
            metadata: r.metadata()?,
            flags: r.flags()?,
            successful: true,
        };
        r.finish()?;
        Ok(cmd)
    }
}

impl ClearCommand {
    pub fn parameters(&self) -> Vec<Param> {
        vec![Param::Flags(self.flags.remotable())]
    }

    pub fn from_parameters(command_id: u8, params: Vec<Param>) -> Result<Self, ShoalError> {
        let mut r = Reader::open(Self::COMMAND_ID, command_id, params)?;
        let cmd = ClearCommand { flags: r.flags()? };
        r.finish()?;
        Ok(cmd)
    }
}

impl PrepareCommand {
    pub fn parameters(&self) -> Vec<Param> {
        vec![
            Param::Gtx(self.gtx.clone()),
            Param::Commands(self.modifications.iter().map(Command::to_wire).collect()),
            Param::Bool(self.one_phase),
        ]
    }

    pub fn from_parameters(command_id: u8, params: Vec<Param>) -> Result<Self, ShoalError> {
        let mut r = Reader::open(Self::COMMAND_ID, command_id, params)?;
        let gtx = r.gtx()?;
        let modifications = r
            .commands()?
            .into_iter()
            .map(Command::from_wire)
            .collect::<Result<Vec<_>, _>>()?;
        let one_phase = r.bool()?;
        r.finish()?;
        Ok(PrepareCommand { gtx, modifications, one_phase })
    }
}

macro_rules! gtx_only_parameters {
    ($($ty:ident),*) => {
        $(
            impl $ty {
                pub fn parameters(&self) -> Vec<Param> {
                    vec![Param::Gtx(self.gtx.clone())]
                }

                pub fn from_parameters(command_id: u8, params: Vec<Param>) -> Result<Self, ShoalError> {
                    let mut r = Reader::open(Self::COMMAND_ID, command_id, params)?;
                    let cmd = $ty { gtx: r.gtx()? };
                    r.finish()?;
                    Ok(cmd)
                }
            }
        )*
    };
}

gtx_only_parameters!(CommitCommand, RollbackCommand, TxCompletionNotificationCommand);

impl Command {
    pub fn to_wire(&self) -> WireCommand {
        let params = match self {
            Command::Get(c) => c.parameters(),
            Command::ClusteredGet(c) => c.parameters(),
            Command::Put(c) => c.parameters(),
            Command::PutMap(c) => c.parameters(),
            Command::Remove(c) => c.parameters(),
            Command::Replace(c) => c.parameters(),
            Command::Clear(c) => c.parameters(),
            Command::Prepare(c) => c.parameters(),
            Command::Commit(c) => c.parameters(),
            Command::Rollback(c) => c.parameters(),
            Command::TxCompletion(c) => c.parameters(),
        };
        WireCommand { command_id: self.command_id(), params }
    }

    pub fn from_wire(wire: WireCommand) -> Result<Command, ShoalError> {
        let WireCommand { command_id: id, params } = wire;
        Ok(match id {
            GetKeyValueCommand::COMMAND_ID => GetKeyValueCommand::from_parameters(id, params)?.into(),
            ClusteredGetCommand::COMMAND_ID => ClusteredGetCommand::from_parameters(id, params)?.into(),
            PutKeyValueCommand::COMMAND_ID => PutKeyValueCommand::from_parameters(id, params)?.into(),
            PutMapCommand::COMMAND_ID => PutMapCommand::from_parameters(id, params)?.into(),
            RemoveCommand::COMMAND_ID => RemoveCommand::from_parameters(id, params)?.into(),
            ReplaceCommand::COMMAND_ID => ReplaceCommand::from_parameters(id, params)?.into(),
            ClearCommand::COMMAND_ID => ClearCommand::from_parameters(id, params)?.into(),
            PrepareCommand::COMMAND_ID => PrepareCommand::from_parameters(id, params)?.into(),
            CommitCommand::COMMAND_ID => CommitCommand::from_parameters(id, params)?.into(),
            RollbackCommand::COMMAND_ID => RollbackCommand::from_parameters(id, params)?.into(),
            TxCompletionNotificationCommand::COMMAND_ID => {
                TxCompletionNotificationCommand::from_parameters(id, params)?.into()
            }
            unknown => return Err(ShoalError::Protocol(format!("unknown command id {unknown}"))),
        })
    }
}
