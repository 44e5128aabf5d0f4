//! Messages exchanged over the control socket, one json document per line.

use std::io::{BufRead, BufReader, Read, Write};

use interprocess::local_socket::{prelude::*, GenericNamespaced, Stream};
use serde::{de::DeserializeOwned, Deserialize, Serialize};

use crate::{
    alarm::Alarm,
    config::{Settings, SettingsUpdate},
    error::ProtocolError,
    playback::Status,
};

#[derive(Debug, Serialize, Deserialize, Clone, Copy, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum Action {
    TestAlarm,
    TestContent,
    Stop,
}

/// longest line either side accepts, newline included
pub const MAX_MESSAGE: u64 = 64 * 1024;

/// Requests from a client. Times and masks arrive unvalidated, the server checks them.
#[derive(Debug, Serialize, Deserialize, Clone, PartialEq, Eq)]
pub enum ClientMessage {
    ListAlarms,
    AddAlarm {
        time: String,
        days: u32,
        enabled: bool,
    },
    EditAlarm {
        id: u64,
        time: Option<String>,
        days: Option<u32>,
        enabled: Option<bool>,
    },
    RemoveAlarm(u64),
    GetSettings,
    SetSettings(SettingsUpdate),
    Control(Action),
    Press,
    Status,
}

#[derive(Debug, Serialize, Deserialize, Clone, PartialEq, Eq)]
pub enum ServerMessage {
    Alarms(Vec<Alarm>),
    Alarm(Alarm),
    Settings(Settings),
    Status(Status),
    Ok,
    Error(String),
}

/// # Errors
/// if the message can't be encoded or written
pub fn write_message<W: Write + ?Sized, T: Serialize>(
    writer: &mut W,
    message: &T,
) -> Result<(), ProtocolError> {
    let mut line = serde_json::to_vec(message)?;
    line.push(b'\n');
    writer.write_all(&line)?;
    writer.flush()?;
    Ok(())
}

/// Reads one message, `None` once the other side hung up.
///
/// # Errors
/// if reading fails, the line is over [`MAX_MESSAGE`] bytes or isn't a valid message
pub fn read_message<R: BufRead + ?Sized, T: DeserializeOwned>(
    reader: &mut R,
) -> Result<Option<T>, ProtocolError> {
    let mut line = String::new();
    let read = (&mut *reader).take(MAX_MESSAGE).read_line(&mut line)?;
    if read == 0 {
        return Ok(None);
    }
    if !line.ends_with('\n') && read as u64 >= MAX_MESSAGE {
        return Err(ProtocolError::TooLong(MAX_MESSAGE));
    }
    Ok(Some(serde_json::from_str(line.trim_end())?))
}

/// Connection to a running daemon.
#[derive(Debug)]
pub struct Client {
    conn: BufReader<Stream>,
}

impl Client {
    /// # Errors
    /// if no daemon is listening on `socket_name`
    pub fn connect(socket_name: &str) -> Result<Self, ProtocolError> {
        let name = socket_name.to_ns_name::<GenericNamespaced>()?;
        let conn = Stream::connect(name)?;
        Ok(Self {
            conn: BufReader::new(conn),
        })
    }

    /// Sends `message` and waits for the reply.
    ///
    /// # Errors
    /// if the connection fails or the server answers with an error
    pub fn request(&mut self, message: &ClientMessage) -> Result<ServerMessage, ProtocolError> {
        write_message(self.conn.get_mut(), message)?;
        match read_message(&mut self.conn)? {
            Some(ServerMessage::Error(e)) => Err(ProtocolError::Server(e)),
            Some(reply) => Ok(reply),
            None => Err(ProtocolError::Closed),
        }
    }
}
