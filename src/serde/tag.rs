//! Tagged container format serialization and deserialization.
//!
//! A tag is a hierarchical, named, typed value: primitives, byte arrays, strings,
//! homogeneous lists and nested compounds. The binary encoding is big-endian and
//! self-describing, every named value is prefixed by a one-byte type id.

use std::collections::BTreeMap;
use std::io::{self, Read, Write};

use byteorder::{ReadBytesExt, WriteBytesExt, BE};


const TYPE_BYTE       : i8 = 1;
const TYPE_SHORT      : i8 = 2;
const TYPE_INT        : i8 = 3;
const TYPE_LONG       : i8 = 4;
const TYPE_FLOAT      : i8 = 5;
const TYPE_DOUBLE     : i8 = 6;
const TYPE_BYTE_ARRAY : i8 = 7;
const TYPE_STRING     : i8 = 8;
const TYPE_LIST       : i8 = 9;
const TYPE_COMPOUND   : i8 = 10;


/// A generic tag value.
#[derive(Debug, Clone, PartialEq)]
pub enum Tag {
    Byte(i8),
    Short(i16),
    Int(i32),
    Long(i64),
    Float(f32),
    Double(f64),
    ByteArray(Vec<u8>),
    String(String),
    /// An ordered list of tags, all items must share a single type.
    List(Vec<Tag>),
    Compound(TagCompound),
}

/// A named mapping of keys to tags, hiding the internal map implementation.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct TagCompound {
    inner: BTreeMap<String, Tag>,
}


/// Deserialize a root compound from a reader.
pub fn from_reader(mut reader: impl Read) -> Result<TagCompound, TagError> {
    compound_from_reader(&mut reader)
}

/// Serialize a root compound into a writer.
pub fn to_writer(mut writer: impl Write, root: &TagCompound) -> Result<(), TagError> {
    compound_to_writer(&mut writer, root)
}


/// Internal function to read a tag of a specific type.
fn tag_from_reader(reader: &mut impl Read, type_id: i8) -> Result<Tag, TagError> {
    Ok(match type_id {
        TYPE_BYTE => Tag::Byte(reader.read_i8()?),
        TYPE_SHORT => Tag::Short(reader.read_i16::<BE>()?),
        TYPE_INT => Tag::Int(reader.read_i32::<BE>()?),
        TYPE_LONG => Tag::Long(reader.read_i64::<BE>()?),
        TYPE_FLOAT => Tag::Float(reader.read_f32::<BE>()?),
        TYPE_DOUBLE => Tag::Double(reader.read_f64::<BE>()?),
        TYPE_BYTE_ARRAY => Tag::ByteArray(byte_array_from_reader(reader)?),
        TYPE_STRING => Tag::String(string_from_reader(reader)?),
        TYPE_LIST => {

            let item_type_id = reader.read_i8()?;
            let len: usize = reader.read_i32::<BE>()?.try_into()
                .map_err(|_| TagError::IllegalLength)?;

            let mut items = Vec::with_capacity(len.min(4096));
            for _ in 0..len {
                items.push(tag_from_reader(reader, item_type_id)?);
            }

            Tag::List(items)

        }
        TYPE_COMPOUND => Tag::Compound(compound_from_reader(reader)?),
        _ => return Err(TagError::IllegalType(type_id)),
    })
}

fn byte_array_from_reader(reader: &mut impl Read) -> Result<Vec<u8>, TagError> {
    let len: usize = reader.read_i32::<BE>()?.try_into()
        .map_err(|_| TagError::IllegalLength)?;
    let mut buf = vec![0u8; len];
    reader.read_exact(&mut buf)?;
    Ok(buf)
}

fn string_from_reader(reader: &mut impl Read) -> Result<String, TagError> {
    let len = reader.read_u16::<BE>()?;
    let mut buf = vec![0u8; len as usize];
    reader.read_exact(&mut buf)?;
    String::from_utf8(buf).map_err(|_| TagError::InvalidString)
}

fn compound_from_reader(reader: &mut impl Read) -> Result<TagCompound, TagError> {

    let mut inner = BTreeMap::new();

    loop {

        let type_id = reader.read_i8()?;
        if type_id == 0 {
            break Ok(TagCompound { inner });  // End marker.
        }

        let key = string_from_reader(reader)?;
        inner.insert(key, tag_from_reader(reader, type_id)?);

    }

}

/// Internal function to write a tag content, its type id is written by the caller.
fn tag_to_writer(writer: &mut impl Write, tag: &Tag) -> Result<(), TagError> {

    match *tag {
        Tag::Byte(n) => writer.write_i8(n)?,
        Tag::Short(n) => writer.write_i16::<BE>(n)?,
        Tag::Int(n) => writer.write_i32::<BE>(n)?,
        Tag::Long(n) => writer.write_i64::<BE>(n)?,
        Tag::Float(n) => writer.write_f32::<BE>(n)?,
        Tag::Double(n) => writer.write_f64::<BE>(n)?,
        Tag::ByteArray(ref buf) => {
            let len: i32 = buf.len().try_into().map_err(|_| TagError::IllegalLength)?;
            writer.write_i32::<BE>(len)?;
            writer.write_all(buf)?;
        }
        Tag::String(ref string) => string_to_writer(writer, string)?,
        Tag::List(ref items) => {

            // An empty list has no item to take the type from, byte is used then.
            let item_type_id = items.first().map(tag_type_id).unwrap_or(TYPE_BYTE);
            for item in items {
                if tag_type_id(item) != item_type_id {
                    return Err(TagError::MixedList);
                }
            }

            let len: i32 = items.len().try_into().map_err(|_| TagError::IllegalLength)?;
            writer.write_i8(item_type_id)?;
            writer.write_i32::<BE>(len)?;

            for item in items {
                tag_to_writer(writer, item)?;
            }

        }
        Tag::Compound(ref compound) => compound_to_writer(writer, compound)?,
    }

    Ok(())

}

fn string_to_writer(writer: &mut impl Write, string: &str) -> Result<(), TagError> {
    let len: u16 = string.len().try_into().map_err(|_| TagError::IllegalLength)?;
    writer.write_u16::<BE>(len)?;
    writer.write_all(string.as_bytes())?;
    Ok(())
}

fn compound_to_writer(writer: &mut impl Write, compound: &TagCompound) -> Result<(), TagError> {

    for (key, tag) in &compound.inner {
        writer.write_i8(tag_type_id(tag))?;
        string_to_writer(writer, key)?;
        tag_to_writer(writer, tag)?;
    }

    writer.write_i8(0)?;
    Ok(())

}

/// Internal function to get the type id of a tag.
fn tag_type_id(tag: &Tag) -> i8 {
    match tag {
        Tag::Byte(_) => TYPE_BYTE,
        Tag::Short(_) => TYPE_SHORT,
        Tag::Int(_) => TYPE_INT,
        Tag::Long(_) => TYPE_LONG,
        Tag::Float(_) => TYPE_FLOAT,
        Tag::Double(_) => TYPE_DOUBLE,
        Tag::ByteArray(_) => TYPE_BYTE_ARRAY,
        Tag::String(_) => TYPE_STRING,
        Tag::List(_) => TYPE_LIST,
        Tag::Compound(_) => TYPE_COMPOUND,
    }
}


/// Basic methods to interpret a tag as its inner type if possible.
impl Tag {

    #[inline]
    pub fn as_boolean(&self) -> Option<bool> {
        self.as_byte().map(|b| b != 0)
    }

    #[inline]
    pub fn as_byte(&self) -> Option<i8> {
        match *self {
            Self::Byte(n) => Some(n),
            _ => None
        }
    }

    #[inline]
    pub fn as_short(&self) -> Option<i16> {
        match *self {
            Self::Short(n) => Some(n),
            _ => None
        }
    }

    #[inline]
    pub fn as_int(&self) -> Option<i32> {
        match *self {
            Self::Int(n) => Some(n),
            _ => None
        }
    }

    #[inline]
    pub fn as_long(&self) -> Option<i64> {
        match *self {
            Self::Long(n) => Some(n),
            _ => None
        }
    }

    #[inline]
    pub fn as_float(&self) -> Option<f32> {
        match *self {
            Self::Float(n) => Some(n),
            _ => None
        }
    }

    #[inline]
    pub fn as_double(&self) -> Option<f64> {
        match *self {
            Self::Double(n) => Some(n),
            _ => None
        }
    }

    #[inline]
    pub fn as_byte_array(&self) -> Option<&[u8]> {
        match self {
            Self::ByteArray(buf) => Some(&buf[..]),
            _ => None
        }
    }

    #[inline]
    pub fn as_string(&self) -> Option<&str> {
        match self {
            Self::String(string) => Some(string.as_str()),
            _ => None
        }
    }

    #[inline]
    pub fn as_list(&self) -> Option<&[Tag]> {
        match self {
            Self::List(items) => Some(&items[..]),
            _ => None
        }
    }

    #[inline]
    pub fn as_compound(&self) -> Option<&TagCompound> {
        match self {
            Self::Compound(compound) => Some(compound),
            _ => None
        }
    }

}

/// Basic methods to create and manage keys in a compound.
impl TagCompound {

    pub fn new() -> Self {
        Self { inner: BTreeMap::new() }
    }

    #[inline]
    pub fn insert(&mut self, key: impl Into<String>, tag: Tag) {
        self.inner.insert(key.into(), tag);
    }

    #[inline]
    pub fn get(&self, key: &str) -> Option<&Tag> {
        self.inner.get(key)
    }

    #[inline]
    pub fn contains(&self, key: &str) -> bool {
        self.inner.contains_key(key)
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.inner.is_empty()
    }

    #[inline]
    pub fn get_boolean(&self, key: &str) -> Option<bool> {
        self.get(key).and_then(Tag::as_boolean)
    }

    #[inline]
    pub fn get_byte(&self, key: &str) -> Option<i8> {
        self.get(key).and_then(Tag::as_byte)
    }

    #[inline]
    pub fn get_short(&self, key: &str) -> Option<i16> {
        self.get(key).and_then(Tag::as_short)
    }

    #[inline]
    pub fn get_int(&self, key: &str) -> Option<i32> {
        self.get(key).and_then(Tag::as_int)
    }

    #[inline]
    pub fn get_long(&self, key: &str) -> Option<i64> {
        self.get(key).and_then(Tag::as_long)
    }

    #[inline]
    pub fn get_float(&self, key: &str) -> Option<f32> {
        self.get(key).and_then(Tag::as_float)
    }

    #[inline]
    pub fn get_double(&self, key: &str) -> Option<f64> {
        self.get(key).and_then(Tag::as_double)
    }

    #[inline]
    pub fn get_byte_array(&self, key: &str) -> Option<&[u8]> {
        self.get(key).and_then(Tag::as_byte_array)
    }

    #[inline]
    pub fn get_string(&self, key: &str) -> Option<&str> {
        self.get(key).and_then(Tag::as_string)
    }

    #[inline]
    pub fn get_list(&self, key: &str) -> Option<&[Tag]> {
        self.get(key).and_then(Tag::as_list)
    }

    #[inline]
    pub fn get_compound(&self, key: &str) -> Option<&TagCompound> {
        self.get(key).and_then(Tag::as_compound)
    }

}


/// Error type used for every call on tag read and write functions.
#[derive(thiserror::Error, Debug)]
pub enum TagError {
    #[error("{0}")]
    Io(#[from] io::Error),
    #[error("illegal tag type id {0}")]
    IllegalType(i8),
    #[error("illegal decoded length")]
    IllegalLength,
    #[error("all list items should be of the same tag type")]
    MixedList,
    #[error("invalid utf-8 string")]
    InvalidString,
}


#[cfg(test)]
mod tests {

    use super::*;

    #[test]
    fn round_trip() {

        let mut inner = TagCompound::new();
        inner.insert("name", Tag::String("chest".to_string()));
        inner.insert("seed", Tag::Long(0x1234_5678_9ABC_DEF0u64 as i64));

        let mut root = TagCompound::new();
        root.insert("generated", Tag::Byte(1));
        root.insert("age", Tag::Long(42));
        root.insert("blob", Tag::ByteArray(vec![0, 1, 2, 255]));
        root.insert("ratio", Tag::Double(0.5));
        root.insert("items", Tag::List(vec![
            Tag::Compound(inner.clone()),
            Tag::Compound(inner),
        ]));

        let mut buf = Vec::new();
        to_writer(&mut buf, &root).unwrap();
        let read = from_reader(&buf[..]).unwrap();

        assert_eq!(root, read);
        assert_eq!(read.get_boolean("generated"), Some(true));
        assert_eq!(read.get_long("age"), Some(42));
        assert_eq!(read.get_list("items").map(|items| items.len()), Some(2));

    }

    #[test]
    fn empty_list() {

        let mut root = TagCompound::new();
        root.insert("queuedStructures", Tag::List(Vec::new()));

        let mut buf = Vec::new();
        to_writer(&mut buf, &root).unwrap();
        let read = from_reader(&buf[..]).unwrap();

        assert_eq!(read.get_list("queuedStructures"), Some(&[][..]));

    }

    #[test]
    fn mixed_list() {

        let mut root = TagCompound::new();
        root.insert("bad", Tag::List(vec![Tag::Byte(1), Tag::Int(2)]));

        let mut buf = Vec::new();
        assert!(matches!(to_writer(&mut buf, &root), Err(TagError::MixedList)));

    }

}
