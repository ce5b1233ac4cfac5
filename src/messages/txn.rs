//! Transaction and session-option messages

use crate::buffer::ByteBuffer;
use crate::constants::MessageType;
use crate::error::Result;
use crate::packet::FrameHeader;

use super::{Message, WireContext};

macro_rules! empty_message {
    ($(#[$doc:meta])* $name:ident, $ty:expr) => {
        $(#[$doc])*
        #[derive(Debug, Clone, Copy, Default)]
        pub struct $name;

        impl Message for $name {
            type Output = ();

            fn msg_type(&self) -> MessageType {
                $ty
            }

            fn encode(&self, _buf: &mut ByteBuffer, _ctx: &WireContext) -> Result<()> {
                Ok(())
            }

            fn decode(&mut self, _header: &FrameHeader, _body: &mut ByteBuffer, _ctx: &WireContext) -> Result<()> {
                Ok(())
            }
        }
    };
}

macro_rules! trx_message {
    ($(#[$doc:meta])* $name:ident, $ty:expr) => {
        $(#[$doc])*
        ///
        /// Returns the transaction status after the operation.
        #[derive(Debug, Clone, Copy, Default)]
        pub struct $name;

        impl Message for $name {
            type Output = i32;

            fn msg_type(&self) -> MessageType {
                $ty
            }

            fn encode(&self, _buf: &mut ByteBuffer, _ctx: &WireContext) -> Result<()> {
                Ok(())
            }

            fn decode(&mut self, _header: &FrameHeader, body: &mut ByteBuffer, _ctx: &WireContext) -> Result<i32> {
                body.read_i32()
            }
        }
    };
}

empty_message!(
    /// Liveness check
    PingMessage,
    MessageType::Ping
);
empty_message!(
    /// End the server session
    LogoutMessage,
    MessageType::Logout
);
trx_message!(
    /// Commit the current transaction
    CommitMessage,
    MessageType::Commit
);
trx_message!(
    /// Roll back the current transaction
    RollbackMessage,
    MessageType::Rollback
);

/// Change the isolation level; the server echoes the effective level
#[derive(Debug, Clone, Copy, Default)]
pub struct SetIsolationMessage {
    /// Isolation code
    pub level: i32,
}

impl Message for SetIsolationMessage {
    type Output = i32;

    fn msg_type(&self) -> MessageType {
        MessageType::SetIsolation
    }

    fn encode(&self, buf: &mut ByteBuffer, _ctx: &WireContext) -> Result<()> {
        buf.write_i32(self.level);
        Ok(())
    }

    fn decode(&mut self, _header: &FrameHeader, body: &mut ByteBuffer, _ctx: &WireContext) -> Result<i32> {
        body.read_i32()
    }
}

/// Switch the read-only flag; the server echoes the effective flag
#[derive(Debug, Clone, Copy, Default)]
pub struct SetReadOnlyMessage {
    /// Desired flag
    pub read_only: bool,
}

impl Message for SetReadOnlyMessage {
    type Output = bool;

    fn msg_type(&self) -> MessageType {
        MessageType::SetReadOnly
    }

    fn encode(&self, buf: &mut ByteBuffer, _ctx: &WireContext) -> Result<()> {
        buf.write_u8(self.read_only as u8);
        Ok(())
    }

    fn decode(&mut self, _header: &FrameHeader, body: &mut ByteBuffer, _ctx: &WireContext) -> Result<bool> {
        body.read_bool()
    }
}

/// Modification timestamp of a table
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct TableTimestamp {
    /// Table id
    pub table_id: i32,
    /// Last modification stamp
    pub timestamp: i64,
}

impl TableTimestamp {
    /// Decode `[count:i16][(id:i32, ts:i64)]*`
    pub fn read_list(buf: &mut ByteBuffer) -> Result<Vec<Self>> {
        let n = buf.read_i16()?.max(0) as usize;
        let mut out = Vec::with_capacity(n);
        for _ in 0..n {
            out.push(Self {
                table_id: buf.read_i32()?,
                timestamp: buf.read_i64()?,
            });
        }
        Ok(out)
    }

    /// Encode a list
    pub fn write_list(buf: &mut ByteBuffer, list: &[Self]) {
        buf.write_i16(list.len() as i16);
        for t in list {
            buf.write_i32(t.table_id);
            buf.write_i64(t.timestamp);
        }
    }
}

/// Query current timestamps of tables
#[derive(Debug, Clone, Default)]
pub struct TableTsMessage {
    /// Tables to look up
    pub table_ids: Vec<i32>,
}

impl TableTsMessage {
    /// Decode a request body (used by test servers)
    pub fn read(buf: &mut ByteBuffer) -> Result<Self> {
        let n = buf.read_i16()?.max(0) as usize;
        let table_ids = (0..n).map(|_| buf.read_i32()).collect::<Result<_>>()?;
        Ok(Self { table_ids })
    }
}

impl Message for TableTsMessage {
    type Output = Vec<TableTimestamp>;

    fn msg_type(&self) -> MessageType {
        MessageType::TableTs
    }

    fn encode(&self, buf: &mut ByteBuffer, _ctx: &WireContext) -> Result<()> {
        buf.write_i16(self.table_ids.len() as i16);
        for id in &self.table_ids {
            buf.write_i32(*id);
        }
        Ok(())
    }

    fn decode(&mut self, _header: &FrameHeader, body: &mut ByteBuffer, _ctx: &WireContext) -> Result<Vec<TableTimestamp>> {
        TableTimestamp::read_list(body)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_trivial_bodies_are_empty() {
        let ctx = WireContext::default();
        let mut buf = ByteBuffer::new();
        PingMessage.encode(&mut buf, &ctx).unwrap();
        CommitMessage.encode(&mut buf, &ctx).unwrap();
        LogoutMessage.encode(&mut buf, &ctx).unwrap();
        assert!(buf.is_empty());
        assert_eq!(CommitMessage.msg_type(), MessageType::Commit);
        assert_eq!(RollbackMessage.msg_type(), MessageType::Rollback);
    }

    #[test]
    fn test_set_isolation_echo() {
        let ctx = WireContext::default();
        let mut msg = SetIsolationMessage { level: 3 };
        let mut buf = ByteBuffer::new();
        msg.encode(&mut buf, &ctx).unwrap();
        assert_eq!(msg.decode(&FrameHeader::default(), &mut buf, &ctx).unwrap(), 3);
    }

    #[test]
    fn test_table_ts_request_and_reply() {
        let ctx = WireContext::default();
        let msg = TableTsMessage {
            table_ids: vec![1001, 1002],
        };
        let mut buf = ByteBuffer::new();
        msg.encode(&mut buf, &ctx).unwrap();
        assert_eq!(TableTsMessage::read(&mut buf).unwrap().table_ids, vec![1001, 1002]);

        let list = vec![TableTimestamp { table_id: 1001, timestamp: 5 }];
        let mut reply = ByteBuffer::new();
        TableTimestamp::write_list(&mut reply, &list);
        assert_eq!(TableTimestamp::read_list(&mut reply).unwrap(), list);
    }
}
