//! A minimal JDWP endpoint for exercising the connector without a JVM.
//!
//! The fake VM knows one class, `a.Main`, with a single method `main`
//! spanning lines 10 to 12, and runs a fixed script: the class loads right
//! after the debugger finishes setting up, the first resume hits line 11 and
//! the second resume ends the VM.

use std::{
    io::{Read, Write},
    net::{TcpListener, TcpStream},
    sync::Arc,
    thread::{self, JoinHandle},
};

use jdb_engine::jdwp::{
    constants::{event_kinds, suspend_policy, HANDSHAKE, HEADER_LEN},
    CommandPacket, IdSizes, JdwpLocation, Packet, PacketReader, PacketWriter, ReplyPacket,
};
use parking_lot::Mutex;

pub const MAIN_CLASS: u64 = 0x100;
pub const MAIN_METHOD: u64 = 0x200;
pub const MAIN_THREAD: u64 = 0x300;
pub const MAIN_FRAME: u64 = 0x400;
pub const ARGS_ARRAY: u64 = 0x500;
pub const STRING_ARRAY_CLASS: u64 = 0x600;

const NOT_IMPLEMENTED: u16 = 99;

/// How the fake endpoint greets the debugger.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Greeting {
    /// Proper JDWP handshake
    Jdwp,
    /// Something that is not JDWP
    Garbage,
}

/// What the first resume delivers.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Script {
    /// A breakpoint hit at line 11
    Breakpoint,
    /// A correctly framed event set whose breakpoint event is cut short
    TruncatedEvent,
}

/// Handle to a fake VM serving one connection on a background thread.
pub struct FakeVm {
    pub port: u16,
    commands: Arc<Mutex<Vec<(u8, u8)>>>,
    thread: JoinHandle<()>,
}

impl FakeVm {
    pub fn start(greeting: Greeting) -> Self {
        Self::start_with(greeting, Script::Breakpoint)
    }

    pub fn start_with(greeting: Greeting, script: Script) -> Self {
        let listener = TcpListener::bind("127.0.0.1:0").unwrap();
        let port = listener.local_addr().unwrap().port();
        let commands = Arc::new(Mutex::new(Vec::new()));

        let log = Arc::clone(&commands);
        let thread = thread::spawn(move || {
            let (stream, _) = listener.accept().unwrap();
            let mut session = Session { stream, log, script, next_request: 0, resumes: 0 };
            session.run(greeting);
        });

        Self { port, commands, thread }
    }

    /// Wait for the debugger to disconnect; returns `(command set, command)`
    /// of every command received, in order.
    pub fn join(self) -> Vec<(u8, u8)> {
        self.thread.join().unwrap();
        self.commands.lock().clone()
    }
}

struct Session {
    stream: TcpStream,
    log: Arc<Mutex<Vec<(u8, u8)>>>,
    script: Script,
    next_request: i32,
    resumes: usize,
}

impl Session {
    fn run(&mut self, greeting: Greeting) {
        let mut handshake = [0u8; HANDSHAKE.len()];
        if self.stream.read_exact(&mut handshake).is_err() {
            return;
        }
        match greeting {
            Greeting::Jdwp => self.stream.write_all(HANDSHAKE).unwrap(),
            Greeting::Garbage => {
                let _ = self.stream.write_all(b"HTTP/1.1 400 x\n");
                return;
            }
        }

        while let Some(command) = self.read_command() {
            self.log.lock().push((command.command_set, command.command));
            if !self.answer(command) {
                break;
            }
        }
    }

    fn read_command(&mut self) -> Option<CommandPacket> {
        let mut header = [0u8; HEADER_LEN];
        self.stream.read_exact(&mut header).ok()?;
        let mut data = vec![0u8; Packet::announced_len(&header) - HEADER_LEN];
        self.stream.read_exact(&mut data).ok()?;
        match Packet::from_parts(&header, data) {
            Packet::Command(command) => Some(command),
            Packet::Reply(_) => None,
        }
    }

    fn writer() -> PacketWriter {
        PacketWriter::new(IdSizes::default())
    }

    fn reply(&mut self, id: u32, data: Vec<u8>) {
        self.stream.write_all(&ReplyPacket { id, error_code: 0, data }.encode()).unwrap();
    }

    fn error(&mut self, id: u32, error_code: u16) {
        self.stream.write_all(&ReplyPacket { id, error_code, data: Vec::new() }.encode()).unwrap();
    }

    fn event(&mut self, data: Vec<u8>) {
        let packet = CommandPacket { id: 0x7000_0000, command_set: 64, command: 100, data };
        self.stream.write_all(&packet.encode()).unwrap();
    }

    fn main_location(index: u64) -> JdwpLocation {
        JdwpLocation { type_tag: 1, class_id: MAIN_CLASS, method_id: MAIN_METHOD, index }
    }

    /// Answer one command. Returns `false` once the debugger disposed.
    fn answer(&mut self, command: CommandPacket) -> bool {
        let id = command.id;
        let mut args = PacketReader::new(IdSizes::default(), &command.data);

        match (command.command_set, command.command) {
            // VirtualMachine.Version
            (1, 1) => {
                let data = Self::writer()
                    .string("Fake VM")
                    .i32(17)
                    .i32(0)
                    .string("17.0.2")
                    .string("FakeVM 64-Bit")
                    .finish();
                self.reply(id, data);
            }
            // VirtualMachine.ClassesBySignature: nothing loaded yet, the
            // class loads as soon as setup is done
            (1, 2) => {
                self.reply(id, Self::writer().i32(0).finish());
                let event = Self::writer()
                    .u8(suspend_policy::ALL)
                    .i32(1)
                    .u8(event_kinds::CLASS_PREPARE)
                    .i32(1)
                    .object_id(MAIN_THREAD)
                    .u8(1)
                    .reference_type_id(MAIN_CLASS)
                    .string("La/Main;")
                    .i32(7)
                    .finish();
                self.event(event);
            }
            // VirtualMachine.Dispose
            (1, 6) => {
                self.reply(id, Vec::new());
                return false;
            }
            // VirtualMachine.IDSizes
            (1, 7) => {
                let data = Self::writer().i32(8).i32(8).i32(8).i32(8).i32(8).finish();
                self.reply(id, data);
            }
            // VirtualMachine.Resume
            (1, 9) => {
                self.reply(id, Vec::new());
                self.resumes += 1;
                let event = match (self.resumes, self.script) {
                    (1, Script::TruncatedEvent) => Self::writer()
                        .u8(suspend_policy::ALL)
                        .i32(1)
                        .u8(event_kinds::BREAKPOINT)
                        .i32(2)
                        .u8(0)
                        .u8(0)
                        .finish(),
                    (1, Script::Breakpoint) => Self::writer()
                        .u8(suspend_policy::ALL)
                        .i32(1)
                        .u8(event_kinds::BREAKPOINT)
                        .i32(2)
                        .object_id(MAIN_THREAD)
                        .location(&Self::main_location(4))
                        .finish(),
                    _ => Self::writer()
                        .u8(suspend_policy::NONE)
                        .i32(1)
                        .u8(event_kinds::VM_DEATH)
                        .i32(0)
                        .finish(),
                };
                self.event(event);
            }
            // ReferenceType.Signature
            (2, 1) => {
                let signature = match args.reference_type_id().unwrap() {
                    MAIN_CLASS => "La/Main;",
                    STRING_ARRAY_CLASS => "[Ljava/lang/String;",
                    _ => return self.fail(id),
                };
                self.reply(id, Self::writer().string(signature).finish());
            }
            // ReferenceType.Methods
            (2, 5) => {
                let data = Self::writer()
                    .i32(1)
                    .method_id(MAIN_METHOD)
                    .string("main")
                    .string("([Ljava/lang/String;)V")
                    .i32(9)
                    .finish();
                self.reply(id, data);
            }
            // Method.LineTable
            (6, 1) => {
                let data = Self::writer()
                    .u64(0)
                    .u64(20)
                    .i32(3)
                    .u64(0)
                    .i32(10)
                    .u64(4)
                    .i32(11)
                    .u64(9)
                    .i32(12)
                    .finish();
                self.reply(id, data);
            }
            // Method.VariableTable
            (6, 2) => {
                let data = Self::writer()
                    .i32(1)
                    .i32(3)
                    .u64(0)
                    .string("args")
                    .string("[Ljava/lang/String;")
                    .i32(20)
                    .i32(0)
                    .u64(2)
                    .string("count")
                    .string("I")
                    .i32(18)
                    .i32(1)
                    .u64(9)
                    .string("later")
                    .string("J")
                    .i32(11)
                    .i32(2)
                    .finish();
                self.reply(id, data);
            }
            // ObjectReference.ReferenceType
            (9, 1) => {
                self.reply(id, Self::writer().u8(3).reference_type_id(STRING_ARRAY_CLASS).finish())
            }
            // ThreadReference.Frames
            (11, 6) => {
                let data = Self::writer()
                    .i32(1)
                    .frame_id(MAIN_FRAME)
                    .location(&Self::main_location(4))
                    .finish();
                self.reply(id, data);
            }
            // ArrayReference.Length
            (13, 1) => self.reply(id, Self::writer().i32(2).finish()),
            // EventRequest.Set
            (15, 1) => {
                self.next_request += 1;
                let request = self.next_request;
                self.reply(id, Self::writer().i32(request).finish());
            }
            // EventRequest.Clear
            (15, 2) => self.reply(id, Vec::new()),
            // StackFrame.GetValues
            (16, 1) => {
                let _thread = args.object_id().unwrap();
                let _frame = args.frame_id().unwrap();
                let _count = args.i32().unwrap();
                let data = match args.i32().unwrap() {
                    0 => Self::writer().i32(1).u8(b'[').object_id(ARGS_ARRAY).finish(),
                    1 => Self::writer().i32(1).u8(b'I').i32(3).finish(),
                    _ => return self.fail(id),
                };
                self.reply(id, data);
            }
            _ => self.error(id, NOT_IMPLEMENTED),
        }
        true
    }

    fn fail(&mut self, id: u32) -> bool {
        self.error(id, 35);
        true
    }
}
