// JDB - JVM Debugger
// Copyright (C) 2024 Zhuo Zhang and Wuqi Zhang
//
// This program is free software: you can redistribute it and/or modify
// it under the terms of the GNU Affero General Public License as published by
// the Free Software Foundation, either version 3 of the License, or
// (at your option) any later version.
//
// This program is distributed in the hope that it will be useful,
// but WITHOUT ANY WARRANTY; without even the implied warranty of
// MERCHANTABILITY or FITNESS FOR A PARTICULAR PURPOSE. See the
// GNU Affero General Public License for more details.
//
// You should have received a copy of the GNU Affero General Public License
// along with this program. If not, see <https://www.gnu.org/licenses/>.

//! A single JDWP connection to a target VM.

use std::{
    collections::VecDeque,
    io::{self, Read, Write},
    net::{Shutdown, TcpStream, ToSocketAddrs},
    time::Duration,
};

use tracing::{debug, info, warn};

use super::{
    constants::{command_sets, event_commands, vm_commands, HANDSHAKE, HEADER_LEN},
    events::EventSet,
    packet::{CommandPacket, IdSizes, Packet, PacketReader, PacketWriter},
};
use crate::TargetError;

/// Upper bound for a single packet; anything larger is treated as a corrupt stream.
const MAX_PACKET_LEN: usize = 64 * 1024 * 1024;

/// Version information reported by the target VM.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct VmVersion {
    /// Free-form description
    pub description: String,
    /// JDWP major version
    pub jdwp_major: i32,
    /// JDWP minor version
    pub jdwp_minor: i32,
    /// `java.version` of the target
    pub vm_version: String,
    /// `java.vm.name` of the target
    pub vm_name: String,
}

/// An open JDWP connection.
///
/// Commands are issued synchronously: [`JdwpConnection::request`] writes a
/// command and reads until the matching reply arrives. Event packets that
/// arrive in the meantime are queued and handed out, in arrival order, by
/// [`JdwpConnection::next_event_set`].
#[derive(Debug)]
pub struct JdwpConnection {
    stream: TcpStream,
    endpoint: String,
    sizes: IdSizes,
    next_id: u32,
    queued_events: VecDeque<Vec<u8>>,
    disposed: bool,
}

impl JdwpConnection {
    /// Connect to `host:port`, perform the handshake and negotiate ID sizes.
    ///
    /// `timeout` bounds the TCP connect and the handshake; later reads block
    /// indefinitely, since a stopped target may stay silent for as long as the
    /// user likes.
    pub fn connect(host: &str, port: u16, timeout: Option<Duration>) -> Result<Self, TargetError> {
        let endpoint = format!("{host}:{port}");
        let fail = |reason: String| TargetError::Connection { endpoint: endpoint.clone(), reason };

        let stream = open_stream(host, port, timeout).map_err(|e| fail(e.to_string()))?;
        stream.set_nodelay(true).map_err(|e| fail(e.to_string()))?;

        let mut connection = Self {
            stream,
            endpoint: endpoint.clone(),
            sizes: IdSizes::default(),
            next_id: 1,
            queued_events: VecDeque::new(),
            disposed: false,
        };

        connection.handshake(timeout).map_err(|e| fail(e.to_string()))?;
        connection.sizes = connection.negotiate_id_sizes().map_err(|e| fail(e.to_string()))?;
        connection.stream.set_read_timeout(None).map_err(|e| fail(e.to_string()))?;

        info!(endpoint = %endpoint, sizes = ?connection.sizes, "JDWP connection established");
        Ok(connection)
    }

    /// `host:port` this connection was opened to.
    pub fn endpoint(&self) -> &str {
        &self.endpoint
    }

    /// Identifier widths negotiated with the target.
    pub fn id_sizes(&self) -> IdSizes {
        self.sizes
    }

    /// Start a command payload using the negotiated identifier widths.
    pub fn writer(&self) -> PacketWriter {
        PacketWriter::new(self.sizes)
    }

    fn handshake(&mut self, timeout: Option<Duration>) -> Result<(), TargetError> {
        self.stream.set_read_timeout(timeout)?;
        self.stream.write_all(HANDSHAKE)?;

        let mut reply = [0u8; HANDSHAKE.len()];
        self.stream.read_exact(&mut reply)?;
        if &reply != HANDSHAKE {
            return Err(TargetError::Protocol(format!(
                "unexpected handshake reply {:?}",
                String::from_utf8_lossy(&reply)
            )));
        }

        debug!(endpoint = %self.endpoint, "JDWP handshake completed");
        Ok(())
    }

    fn negotiate_id_sizes(&mut self) -> Result<IdSizes, TargetError> {
        let data = self.request(
            command_sets::VIRTUAL_MACHINE,
            vm_commands::ID_SIZES,
            "VirtualMachine.IDSizes",
            Vec::new(),
        )?;

        let mut reader = PacketReader::new(self.sizes, &data);
        let mut width = || -> Result<usize, TargetError> {
            let n = reader.i32()?;
            match usize::try_from(n) {
                Ok(n @ 1..=8) => Ok(n),
                _ => Err(TargetError::Protocol(format!("unsupported identifier width {n}"))),
            }
        };

        Ok(IdSizes {
            field_id: width()?,
            method_id: width()?,
            object_id: width()?,
            reference_type_id: width()?,
            frame_id: width()?,
        })
    }

    /// Query the target's version information.
    pub fn version(&mut self) -> Result<VmVersion, TargetError> {
        let data = self.request(
            command_sets::VIRTUAL_MACHINE,
            vm_commands::VERSION,
            "VirtualMachine.Version",
            Vec::new(),
        )?;

        let mut reader = PacketReader::new(self.sizes, &data);
        Ok(VmVersion {
            description: reader.string()?,
            jdwp_major: reader.i32()?,
            jdwp_minor: reader.i32()?,
            vm_version: reader.string()?,
            vm_name: reader.string()?,
        })
    }

    /// Send a command and wait for its reply payload.
    ///
    /// A non-zero error code in the reply becomes [`TargetError::Command`].
    pub fn request(
        &mut self,
        command_set: u8,
        command: u8,
        name: &'static str,
        data: Vec<u8>,
    ) -> Result<Vec<u8>, TargetError> {
        let id = self.next_id;
        self.next_id = self.next_id.wrapping_add(1).max(1);

        let packet = CommandPacket { id, command_set, command, data };
        self.stream.write_all(&packet.encode())?;

        loop {
            match self.read_packet()? {
                Packet::Reply(reply) if reply.id == id => {
                    if reply.error_code != 0 {
                        return Err(TargetError::Command { command: name, code: reply.error_code });
                    }
                    return Ok(reply.data);
                }
                Packet::Reply(reply) => {
                    warn!(id = reply.id, expected = id, "Dropping reply to an unknown request");
                }
                Packet::Command(command) => self.queue_command(command),
            }
        }
    }

    /// Next event set, in arrival order. Blocks until one arrives.
    ///
    /// A set whose payload does not decode yields
    /// [`TargetError::MalformedEvents`]; the stream stays usable.
    pub fn next_event_set(&mut self) -> Result<EventSet, TargetError> {
        let data = match self.queued_events.pop_front() {
            Some(data) => data,
            None => loop {
                match self.read_packet()? {
                    Packet::Command(command) if is_composite(&command) => break command.data,
                    Packet::Command(command) => {
                        debug!(
                            set = command.command_set,
                            command = command.command,
                            "Ignoring unexpected command from target"
                        );
                    }
                    Packet::Reply(reply) => {
                        warn!(id = reply.id, "Dropping reply while waiting for events");
                    }
                }
            },
        };

        EventSet::decode(&mut PacketReader::new(self.sizes, &data))
            .map_err(|e| TargetError::MalformedEvents(e.to_string()))
    }

    /// Tell the target the debugger is going away and close the socket.
    ///
    /// Safe to call more than once; only the first call talks to the target.
    pub fn dispose(&mut self) -> Result<(), TargetError> {
        if self.disposed {
            return Ok(());
        }
        self.disposed = true;

        let result = match self.request(
            command_sets::VIRTUAL_MACHINE,
            vm_commands::DISPOSE,
            "VirtualMachine.Dispose",
            Vec::new(),
        ) {
            Ok(_) => Ok(()),
            // Nothing left to release on a target that already went away
            Err(e) if e.is_disconnect() => Ok(()),
            Err(e) => Err(e),
        };

        if let Err(e) = self.stream.shutdown(Shutdown::Both) {
            debug!(error = %e, "Socket shutdown after dispose failed");
        }
        info!(endpoint = %self.endpoint, "JDWP connection disposed");
        result
    }

    /// Whether [`JdwpConnection::dispose`] has been called.
    pub fn is_disposed(&self) -> bool {
        self.disposed
    }

    fn queue_command(&mut self, command: CommandPacket) {
        if is_composite(&command) {
            self.queued_events.push_back(command.data);
        } else {
            debug!(
                set = command.command_set,
                command = command.command,
                "Ignoring unexpected command from target"
            );
        }
    }

    fn read_packet(&mut self) -> Result<Packet, TargetError> {
        let mut header = [0u8; HEADER_LEN];
        self.stream.read_exact(&mut header).map_err(eof_is_disconnect)?;

        let len = Packet::announced_len(&header);
        if !(HEADER_LEN..=MAX_PACKET_LEN).contains(&len) {
            return Err(TargetError::Protocol(format!("invalid packet length {len}")));
        }

        let mut data = vec![0u8; len - HEADER_LEN];
        self.stream.read_exact(&mut data).map_err(eof_is_disconnect)?;
        Ok(Packet::from_parts(&header, data))
    }
}

fn is_composite(command: &CommandPacket) -> bool {
    command.command_set == command_sets::EVENT && command.command == event_commands::COMPOSITE
}

fn eof_is_disconnect(e: io::Error) -> TargetError {
    if e.kind() == io::ErrorKind::UnexpectedEof {
        TargetError::Disconnected
    } else {
        TargetError::Io(e)
    }
}

fn open_stream(host: &str, port: u16, timeout: Option<Duration>) -> io::Result<TcpStream> {
    let mut last_error = None;
    for addr in (host, port).to_socket_addrs()? {
        let attempt = match timeout {
            Some(timeout) => TcpStream::connect_timeout(&addr, timeout),
            None => TcpStream::connect(addr),
        };
        match attempt {
            Ok(stream) => return Ok(stream),
            Err(e) => {
                debug!(%addr, error = %e, "Connection attempt failed");
                last_error = Some(e);
            }
        }
    }

    Err(last_error.unwrap_or_else(|| {
        io::Error::new(io::ErrorKind::NotFound, format!("{host} did not resolve to any address"))
    }))
}
