// SPDX-License-Identifier: GPL-3.0-or-later

//! Writes the compilation database: a JSON array of
//! `{"directory", "command", "file"}` records, one per recognised
//! compilation.
//!
//! [`RecordWriter`] is the streaming half: it opens the `[`, writes one
//! record at a time as the collector's accept loop classifies it, and
//! closes the `]` on [`RecordWriter::finish`], so a record is durable on
//! disk as soon as it is written rather than held in memory until the
//! whole run completes (spec.md §4.2's accept-loop step "If the filter
//! yields a record, write it to the output"). [`write_records`] is a
//! thin convenience built on top of it for callers that already have a
//! complete iterator of records (tests, mainly).
//!
//! `command`'s shell-style quoting follows the original C
//! implementation's `json.c::fix_single_argument`: an argument
//! containing whitespace is wrapped in a literal `"`. No backslash
//! escaping happens here — `serde_json`'s own string serialization is
//! the only escaping pass the text goes through (it escapes `\` and `"`
//! for us when the `command` field is written out), so doing it here
//! too would double-escape any argument that already contains a `\` or
//! a `"`.

use serde::Serialize;
use std::io::{self, Write};
use std::path::PathBuf;

#[derive(Debug, Clone, Serialize)]
pub struct Record {
    pub directory: PathBuf,
    pub command: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub file: Option<PathBuf>,
}

impl Record {
    pub fn new(directory: PathBuf, cmd: &[String], file: Option<PathBuf>) -> Self {
        Record {
            directory,
            command: join_command(cmd),
            file,
        }
    }
}

/// Joins an argument vector into a single shell-quoted command string.
///
/// An argument that contains whitespace is wrapped in double quotes.
/// No other transformation is applied: `serde_json` escapes `\` and `"`
/// when it serializes the resulting `command` string, so escaping them
/// here too would escape them twice.
fn join_command(cmd: &[String]) -> String {
    let mut joined = String::new();
    for (index, arg) in cmd.iter().enumerate() {
        if index > 0 {
            joined.push(' ');
        }
        joined.push_str(&quote_argument(arg));
    }
    joined
}

fn quote_argument(arg: &str) -> String {
    let needs_quoting = arg.chars().any(char::is_whitespace);

    if needs_quoting {
        format!("\"{arg}\"")
    } else {
        arg.to_string()
    }
}

/// Incrementally builds the `[...]` compilation database, one record at
/// a time. Each call to [`RecordWriter::write`] is a complete, flushed
/// write: a crash between two calls loses only the record that hadn't
/// been reported yet, not the ones already written.
pub struct RecordWriter<W: Write> {
    writer: W,
    wrote_first: bool,
}

impl<W: Write> RecordWriter<W> {
    pub fn new(mut writer: W) -> io::Result<Self> {
        writer.write_all(b"[\n")?;
        Ok(RecordWriter {
            writer,
            wrote_first: false,
        })
    }

    pub fn write(&mut self, record: &Record) -> io::Result<()> {
        if self.wrote_first {
            self.writer.write_all(b",\n")?;
        } else {
            self.wrote_first = true;
        }
        serde_json::to_writer_pretty(&mut self.writer, record).map_err(json_error_to_io)?;
        self.writer.flush()
    }

    /// Closes the array and flushes the underlying writer.
    pub fn finish(mut self) -> io::Result<()> {
        if self.wrote_first {
            self.writer.write_all(b"\n")?;
        }
        self.writer.write_all(b"]\n")?;
        self.writer.flush()
    }
}

/// Writes a complete set of `records` out as a JSON array. A thin
/// convenience over [`RecordWriter`] for callers that already hold every
/// record at once (the collector itself uses `RecordWriter` directly so
/// it can write as it goes).
pub fn write_records<W, I>(writer: W, records: I) -> io::Result<()>
where
    W: Write,
    I: IntoIterator<Item = Record>,
{
    let mut writer = RecordWriter::new(writer)?;
    for record in records {
        writer.write(&record)?;
    }
    writer.finish()
}

fn json_error_to_io(err: serde_json::Error) -> io::Error {
    io::Error::new(io::ErrorKind::Other, err)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn quotes_arguments_with_whitespace() {
        assert_eq!(quote_argument("hello"), "hello");
        assert_eq!(quote_argument("hello world"), "\"hello world\"");
    }

    #[test]
    fn leaves_backslash_and_quote_untouched_for_serde_json_to_escape() {
        // quote_argument only adds the wrapping `"` for whitespace; it must
        // not also backslash-escape `\`/`"`, or serde_json's own escaping
        // during serialization would double them up.
        assert_eq!(quote_argument(r#"a"b"#), r#"a"b"#);
        assert_eq!(quote_argument(r"a\b"), r"a\b");
        assert_eq!(quote_argument(r#"a "b" c"#), "\"a \"b\" c\"");
    }

    #[test]
    fn quoted_command_round_trips_through_json_without_double_escaping() {
        // The shell already stripped the quotes from `-DMSG="hello world"`
        // by the time this reaches argv, leaving just the embedded space
        // (spec.md §8 scenario 6).
        let record = Record::new(
            PathBuf::from("/project"),
            &[
                "gcc".to_string(),
                "-DMSG=hello world".to_string(),
                "-c".to_string(),
                "a.c".to_string(),
            ],
            Some(PathBuf::from("/project/a.c")),
        );

        let mut buffer = Vec::new();
        write_records(&mut buffer, vec![record]).unwrap();
        let text = String::from_utf8(buffer).unwrap();
        let value: serde_json::Value = serde_json::from_str(&text).unwrap();

        // A single escape-then-unescape round trip through JSON must
        // reproduce the literal quotes `join_command` added, not a
        // doubled-up `\\\"`.
        assert_eq!(
            value[0]["command"].as_str().unwrap(),
            r#"gcc "-DMSG=hello world" -c a.c"#
        );
    }

    #[test]
    fn joins_multiple_arguments_with_single_spaces() {
        let cmd = vec!["cc".to_string(), "-c".to_string(), "a b.c".to_string()];
        assert_eq!(join_command(&cmd), "cc -c \"a b.c\"");
    }

    #[test]
    fn writes_empty_array_for_no_records() {
        let mut buffer = Vec::new();
        write_records(&mut buffer, std::iter::empty()).unwrap();
        let text = String::from_utf8(buffer).unwrap();
        let value: serde_json::Value = serde_json::from_str(&text).unwrap();
        assert_eq!(value, serde_json::json!([]));
    }

    #[test]
    fn streams_records_as_json_array() {
        let records = vec![
            Record::new(
                PathBuf::from("/project"),
                &["cc".to_string(), "-c".to_string(), "a.c".to_string()],
                Some(PathBuf::from("/project/a.c")),
            ),
            Record::new(
                PathBuf::from("/project"),
                &["cc".to_string(), "-c".to_string(), "b.c".to_string()],
                Some(PathBuf::from("/project/b.c")),
            ),
        ];

        let mut buffer = Vec::new();
        write_records(&mut buffer, records).unwrap();
        let text = String::from_utf8(buffer).unwrap();
        let value: serde_json::Value = serde_json::from_str(&text).unwrap();

        assert_eq!(value.as_array().unwrap().len(), 2);
        assert_eq!(value[0]["file"], "/project/a.c");
        assert_eq!(value[0]["command"], "cc -c a.c");
    }

    /// A `Write` sink that hands out cheap clones sharing the same
    /// backing buffer, so a test can keep inspecting what has been
    /// written so far while a `RecordWriter` still owns one of the clones.
    #[derive(Clone, Default)]
    struct SharedBuffer(std::rc::Rc<std::cell::RefCell<Vec<u8>>>);

    impl Write for SharedBuffer {
        fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
            self.0.borrow_mut().write(buf)
        }
        fn flush(&mut self) -> io::Result<()> {
            Ok(())
        }
    }

    #[test]
    fn record_writer_flushes_each_record_before_finish_is_called() {
        // A record is durable as soon as `write` returns: the buffer
        // already holds it even though the array hasn't been closed yet,
        // so a crash right here would only lose whatever comes next.
        let shared = SharedBuffer::default();
        let mut writer = RecordWriter::new(shared.clone()).unwrap();
        writer
            .write(&Record::new(
                PathBuf::from("/project"),
                &["cc".to_string(), "-c".to_string(), "a.c".to_string()],
                Some(PathBuf::from("/project/a.c")),
            ))
            .unwrap();

        let partial = String::from_utf8(shared.0.borrow().clone()).unwrap();
        assert!(partial.contains("a.c"));
        assert!(!partial.trim_end().ends_with(']'));

        writer
            .write(&Record::new(
                PathBuf::from("/project"),
                &["cc".to_string(), "-c".to_string(), "b.c".to_string()],
                Some(PathBuf::from("/project/b.c")),
            ))
            .unwrap();
        writer.finish().unwrap();

        let text = String::from_utf8(shared.0.borrow().clone()).unwrap();
        let value: serde_json::Value = serde_json::from_str(&text).unwrap();
        assert_eq!(value.as_array().unwrap().len(), 2);
    }

    #[test]
    fn omits_file_field_when_absent() {
        let record = Record::new(
            PathBuf::from("/project"),
            &["cc".to_string(), "--version".to_string()],
            None,
        );

        let mut buffer = Vec::new();
        write_records(&mut buffer, vec![record]).unwrap();
        let text = String::from_utf8(buffer).unwrap();
        let value: serde_json::Value = serde_json::from_str(&text).unwrap();

        assert!(value[0].get("file").is_none());
    }
}
