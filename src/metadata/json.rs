//! JSON rendering with configurable indent and separators.
//!
//! Output matches the layout of Python's `json.dumps`: without an indent the
//! separators default to `", "` and `": "`; with an indent the item separator
//! defaults to `","` and every item starts on a fresh, indented line.

use std::io;

use serde::Serialize;
use serde_json::ser::Formatter;

struct SeparatorFormatter<'a> {
    indent: Option<Vec<u8>>,
    item_separator: &'a [u8],
    key_separator: &'a [u8],
    level: usize,
    has_value: bool,
}

impl SeparatorFormatter<'_> {
    fn newline<W: ?Sized + io::Write>(&self, writer: &mut W) -> io::Result<()> {
        if let Some(indent) = &self.indent {
            writer.write_all(b"\n")?;
            for _ in 0..self.level {
                writer.write_all(indent)?;
            }
        }
        Ok(())
    }

    fn open<W: ?Sized + io::Write>(&mut self, writer: &mut W, bracket: &[u8]) -> io::Result<()> {
        self.level += 1;
        self.has_value = false;
        writer.write_all(bracket)
    }

    fn close<W: ?Sized + io::Write>(&mut self, writer: &mut W, bracket: &[u8]) -> io::Result<()> {
        self.level -= 1;
        if self.has_value {
            self.newline(writer)?;
        }
        writer.write_all(bracket)
    }

    fn item<W: ?Sized + io::Write>(&self, writer: &mut W, first: bool) -> io::Result<()> {
        if !first {
            writer.write_all(self.item_separator)?;
        }
        self.newline(writer)
    }
}

impl Formatter for SeparatorFormatter<'_> {
    fn begin_array<W: ?Sized + io::Write>(&mut self, writer: &mut W) -> io::Result<()> {
        self.open(writer, b"[")
    }

    fn end_array<W: ?Sized + io::Write>(&mut self, writer: &mut W) -> io::Result<()> {
        self.close(writer, b"]")
    }

    fn begin_array_value<W: ?Sized + io::Write>(
        &mut self,
        writer: &mut W,
        first: bool,
    ) -> io::Result<()> {
        self.item(writer, first)
    }

    fn end_array_value<W: ?Sized + io::Write>(&mut self, _writer: &mut W) -> io::Result<()> {
        self.has_value = true;
        Ok(())
    }

    fn begin_object<W: ?Sized + io::Write>(&mut self, writer: &mut W) -> io::Result<()> {
        self.open(writer, b"{")
    }

    fn end_object<W: ?Sized + io::Write>(&mut self, writer: &mut W) -> io::Result<()> {
        self.close(writer, b"}")
    }

    fn begin_object_key<W: ?Sized + io::Write>(
        &mut self,
        writer: &mut W,
        first: bool,
    ) -> io::Result<()> {
        self.item(writer, first)
    }

    fn begin_object_value<W: ?Sized + io::Write>(&mut self, writer: &mut W) -> io::Result<()> {
        writer.write_all(self.key_separator)
    }

    fn end_object_value<W: ?Sized + io::Write>(&mut self, _writer: &mut W) -> io::Result<()> {
        self.has_value = true;
        Ok(())
    }
}

/// Render `value` with `indent` spaces per level and the given
/// `(item, key)` separators.
pub(crate) fn to_string<T: Serialize + ?Sized>(
    value: &T,
    indent: Option<usize>,
    separators: Option<(&str, &str)>,
) -> Result<String, serde_json::Error> {
    let (item, key) = separators.unwrap_or(match indent {
        Some(_) => (",", ": "),
        None => (", ", ": "),
    });
    let formatter = SeparatorFormatter {
        indent: indent.map(|n| vec![b' '; n]),
        item_separator: item.as_bytes(),
        key_separator: key.as_bytes(),
        level: 0,
        has_value: false,
    };
    let mut buf = Vec::new();
    let mut serializer = serde_json::Serializer::with_formatter(&mut buf, formatter);
    value.serialize(&mut serializer)?;
    String::from_utf8(buf).map_err(<serde_json::Error as serde::ser::Error>::custom)
}

#[cfg(test)]
mod tests {
    use super::*;
    use rstest::rstest;
    use serde_json::{Value, json};

    fn sample() -> Value {
        json!({"b": [1, 2], "a": {}, "c": []})
    }

    #[rstest]
    #[case(None, None, r#"{"b": [1, 2], "a": {}, "c": []}"#)]
    #[case(None, Some((",", ":")), r#"{"b":[1,2],"a":{},"c":[]}"#)]
    #[case(Some(2), None, "{\n  \"b\": [\n    1,\n    2\n  ],\n  \"a\": {},\n  \"c\": []\n}")]
    #[case(Some(0), None, "{\n\"b\": [\n1,\n2\n],\n\"a\": {},\n\"c\": []\n}")]
    fn renders_like_python(
        #[case] indent: Option<usize>,
        #[case] separators: Option<(&str, &str)>,
        #[case] expected: &str,
    ) {
        let text = to_string(&sample(), indent, separators).unwrap_or_else(|e| panic!("{e}"));
        assert_eq!(text, expected);
    }

    #[rstest]
    fn explicit_item_separator_is_kept_with_indent() {
        let text = to_string(&json!([1, 2]), Some(4), Some((", ", ": ")))
            .unwrap_or_else(|e| panic!("{e}"));
        assert_eq!(text, "[\n    1, \n    2\n]");
    }
}
