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

//! Tagged values and type signatures.

use super::packet::PacketReader;
use crate::TargetError;

/// Value tags as sent on the wire.
pub mod tags {
    /// Array object
    pub const ARRAY: u8 = b'[';
    /// byte
    pub const BYTE: u8 = b'B';
    /// char
    pub const CHAR: u8 = b'C';
    /// Object
    pub const OBJECT: u8 = b'L';
    /// float
    pub const FLOAT: u8 = b'F';
    /// double
    pub const DOUBLE: u8 = b'D';
    /// int
    pub const INT: u8 = b'I';
    /// long
    pub const LONG: u8 = b'J';
    /// short
    pub const SHORT: u8 = b'S';
    /// void
    pub const VOID: u8 = b'V';
    /// boolean
    pub const BOOLEAN: u8 = b'Z';
    /// java.lang.String
    pub const STRING: u8 = b's';
    /// java.lang.Thread
    pub const THREAD: u8 = b't';
    /// java.lang.ThreadGroup
    pub const THREAD_GROUP: u8 = b'g';
    /// java.lang.ClassLoader
    pub const CLASS_LOADER: u8 = b'l';
    /// java.lang.Class
    pub const CLASS_OBJECT: u8 = b'c';
}

/// A value read from the target.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Value {
    /// byte
    Byte(i8),
    /// char (UTF-16 code unit)
    Char(u16),
    /// short
    Short(i16),
    /// int
    Int(i32),
    /// long
    Long(i64),
    /// float
    Float(f32),
    /// double
    Double(f64),
    /// boolean
    Boolean(bool),
    /// void
    Void,
    /// Any reference; `id == 0` is `null`
    Object {
        /// Reference tag (`L`, `[`, `s`, ...)
        tag: u8,
        /// Object id
        id: u64,
    },
}

impl Value {
    /// Read a value whose tag precedes it in the payload.
    pub fn read_tagged(reader: &mut PacketReader<'_>) -> Result<Self, TargetError> {
        let tag = reader.u8()?;
        Self::read_untagged(reader, tag)
    }

    /// Read a value of a known tag.
    pub fn read_untagged(reader: &mut PacketReader<'_>, tag: u8) -> Result<Self, TargetError> {
        let value = match tag {
            tags::BYTE => Self::Byte(reader.u8()? as i8),
            tags::CHAR => Self::Char(reader.u16()?),
            tags::SHORT => Self::Short(reader.u16()? as i16),
            tags::INT => Self::Int(reader.i32()?),
            tags::LONG => Self::Long(reader.i64()?),
            tags::FLOAT => Self::Float(f32::from_bits(reader.i32()? as u32)),
            tags::DOUBLE => Self::Double(f64::from_bits(reader.u64()?)),
            tags::BOOLEAN => Self::Boolean(reader.bool()?),
            tags::VOID => Self::Void,
            tags::ARRAY
            | tags::OBJECT
            | tags::STRING
            | tags::THREAD
            | tags::THREAD_GROUP
            | tags::CLASS_LOADER
            | tags::CLASS_OBJECT => Self::Object { tag, id: reader.object_id()? },
            other => {
                return Err(TargetError::Protocol(format!("unknown value tag {other:#04x}")));
            }
        };
        Ok(value)
    }

    /// Render a primitive value; `None` for references, which need the
    /// target to be described.
    pub fn render_primitive(&self) -> Option<String> {
        let rendered = match self {
            Self::Byte(v) => v.to_string(),
            Self::Char(v) => match char::from_u32(u32::from(*v)) {
                Some(c) => format!("'{c}'"),
                None => format!("'\\u{v:04x}'"),
            },
            Self::Short(v) => v.to_string(),
            Self::Int(v) => v.to_string(),
            Self::Long(v) => v.to_string(),
            Self::Float(v) => v.to_string(),
            Self::Double(v) => v.to_string(),
            Self::Boolean(v) => v.to_string(),
            Self::Void => "void".to_string(),
            Self::Object { id: 0, .. } => "null".to_string(),
            Self::Object { .. } => return None,
        };
        Some(rendered)
    }
}

/// Tag to request a slot with, derived from the variable's declared signature.
pub fn tag_for_signature(signature: &str) -> u8 {
    signature.as_bytes().first().copied().unwrap_or(tags::OBJECT)
}

/// JNI signature of a unit name: `com.example.Main` becomes `Lcom/example/Main;`.
pub fn unit_signature(unit: &str) -> String {
    format!("L{};", unit.replace('.', "/"))
}

/// Human-readable type name of a JNI signature: `[Ljava/lang/String;` becomes
/// `java.lang.String[]`.
pub fn signature_to_name(signature: &str) -> String {
    if let Some(element) = signature.strip_prefix('[') {
        return format!("{}[]", signature_to_name(element));
    }
    if let Some(class) = signature.strip_prefix('L') {
        return class.trim_end_matches(';').replace('/', ".");
    }
    match signature {
        "Z" => "boolean",
        "B" => "byte",
        "C" => "char",
        "S" => "short",
        "I" => "int",
        "J" => "long",
        "F" => "float",
        "D" => "double",
        "V" => "void",
        other => other,
    }
    .to_string()
}
