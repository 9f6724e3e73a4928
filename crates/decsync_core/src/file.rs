//! Name-encoding file wrapper and the recursive log walk.

use crate::error::{DecsyncError, DecsyncResult};
use decsync_fs::{NativeFile, NodeKind};
use tracing::warn;

/// Hidden per-directory counter signalling "subtree changed".
const SEQUENCE_NAME: &str = "decsync-sequence";

/// A file handle that speaks decoded names.
///
/// Every child name passed through [`DecsyncFile::child`] is run through
/// the name codec, so arbitrary strings (path segments, appIds,
/// collections) become legal file names and peers agree on them
/// bit-for-bit. Engine-internal files use [`DecsyncFile::hidden_child`],
/// which prefixes a `.` after encoding; the codec guarantees encoded
/// names never start with a dot, so hidden files are unreachable from
/// user paths.
#[derive(Debug, Clone)]
pub struct DecsyncFile {
    file: NativeFile,
}

impl DecsyncFile {
    /// Wraps a raw file handle.
    #[must_use]
    pub fn new(file: NativeFile) -> Self {
        Self { file }
    }

    /// Returns the underlying raw handle.
    #[must_use]
    pub fn native(&self) -> &NativeFile {
        &self.file
    }

    /// Returns a handle to the child named `name`, encoding it.
    #[must_use]
    pub fn child(&self, name: &str) -> Self {
        Self::new(self.file.child(&decsync_codec::encode(name)))
    }

    /// Returns a handle to the descendant addressed by `path`.
    #[must_use]
    pub fn child_path(&self, path: &[String]) -> Self {
        path.iter().fold(self.clone(), |file, name| file.child(name))
    }

    /// Returns a handle to the hidden child named `name`.
    ///
    /// Only engine internals address hidden files; they never collide
    /// with encoded user names.
    #[must_use]
    pub fn hidden_child(&self, name: &str) -> Self {
        Self::new(self.file.child(&format!(".{}", decsync_codec::encode(name))))
    }

    /// Returns a handle to this directory's hidden sequence counter.
    #[must_use]
    pub(crate) fn sequence_file(&self) -> Self {
        self.hidden_child(SEQUENCE_NAME)
    }

    /// Reads the non-blank lines of the file, starting at `offset` bytes.
    pub fn read_lines(&self, offset: u64) -> DecsyncResult<Vec<String>> {
        Ok(split_lines(&self.file.read(offset)?))
    }

    /// Writes `lines` joined with `\n`, filtering blank lines.
    ///
    /// An effectively empty list with `append == false` deletes the file.
    pub fn write_lines<I, S>(&self, lines: I, append: bool) -> DecsyncResult<()>
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        let mut content = String::new();
        for line in lines {
            let line = line.as_ref();
            if !line.is_empty() {
                content.push_str(line);
                content.push('\n');
            }
        }
        self.file.write(content.as_bytes(), append)?;
        Ok(())
    }

    /// Reads the file as a single line of text.
    ///
    /// Returns `None` when the file is absent or blank.
    ///
    /// # Errors
    ///
    /// Fails when the file holds more than one non-blank line.
    pub fn read_text(&self) -> DecsyncResult<Option<String>> {
        let mut lines = self.read_lines(0)?;
        match lines.len() {
            0 => Ok(None),
            1 => Ok(lines.pop()),
            n => Err(DecsyncError::corrupt(format!(
                "expected a single line, found {n}"
            ))),
        }
    }

    /// Reads a single line, treating unreadable content as absent.
    pub(crate) fn read_text_tolerant(&self) -> Option<String> {
        match self.read_text() {
            Ok(text) => text,
            Err(err) => {
                warn!(error = %err, "treating unreadable single-line file as absent");
                None
            }
        }
    }

    /// Reads a decimal integer, defaulting to 0 when absent or garbled.
    pub(crate) fn read_int_or_zero(&self) -> u64 {
        self.read_text_tolerant()
            .and_then(|text| text.trim().parse().ok())
            .unwrap_or(0)
    }

    /// Writes a single line of text.
    pub fn write_text(&self, text: &str) -> DecsyncResult<()> {
        self.write_lines([text], false)
    }

    /// Returns the file length in bytes, 0 when absent.
    pub fn length(&self) -> DecsyncResult<u64> {
        Ok(self.file.length()?)
    }

    /// Enumerates non-hidden children and decodes their names.
    ///
    /// Names the codec rejects were not written by a DecSync
    /// implementation; they are logged and skipped.
    pub fn decoded_children(&self) -> DecsyncResult<Vec<String>> {
        let mut names = Vec::new();
        for encoded in self.file.children()? {
            if encoded.starts_with('.') {
                continue;
            }
            match decsync_codec::decode(&encoded) {
                Some(name) => names.push(name),
                None => warn!(name = encoded, "skipping undecodable file name"),
            }
        }
        Ok(names)
    }

    /// Deletes this node and everything below it.
    pub fn delete_recursive(&self) -> DecsyncResult<()> {
        Ok(self.file.delete_recursive()?)
    }

    /// Invalidates cached directory listings of the underlying store.
    pub fn reset_cache(&self) {
        self.file.reset_cache();
    }

    /// Walks the tree below this handle and runs `action` on every leaf
    /// file whose decoded relative path satisfies `path_pred`.
    ///
    /// When `read_bytes_src` is given, each directory's sequence counter
    /// is compared against the counter recorded at the same relative
    /// location under `read_bytes_src`; an equal value means nothing
    /// below changed since the last fully successful walk and the whole
    /// subtree is skipped. After a subtree is walked with every action
    /// succeeding, the observed counter is copied into `read_bytes_src`
    /// so the next pass can skip it. A failed action poisons every
    /// ancestor, keeping the work eligible for retry.
    ///
    /// Returns whether every invoked action succeeded.
    pub fn list_files_recursive_relative(
        &self,
        read_bytes_src: Option<&DecsyncFile>,
        path_pred: &dyn Fn(&[String]) -> bool,
        action: &mut dyn FnMut(&[String]) -> bool,
    ) -> DecsyncResult<bool> {
        let mut relative = Vec::new();
        self.walk(read_bytes_src, &mut relative, path_pred, action)
    }

    fn walk(
        &self,
        read_bytes_src: Option<&DecsyncFile>,
        relative: &mut Vec<String>,
        path_pred: &dyn Fn(&[String]) -> bool,
        action: &mut dyn FnMut(&[String]) -> bool,
    ) -> DecsyncResult<bool> {
        match self.file.kind()? {
            NodeKind::Absent => Ok(true),
            NodeKind::File => {
                if path_pred(relative) {
                    Ok(action(relative))
                } else {
                    Ok(true)
                }
            }
            NodeKind::Directory => {
                let sequence = self.sequence_file().read_text_tolerant();
                if let (Some(sequence), Some(src)) = (&sequence, read_bytes_src) {
                    let recorded = src.sequence_file().read_text_tolerant();
                    if recorded.as_deref() == Some(sequence.as_str()) {
                        return Ok(true);
                    }
                }
                let mut all_ok = true;
                for name in self.decoded_children()? {
                    let child_src = read_bytes_src.map(|src| src.child(&name));
                    relative.push(name.clone());
                    let ok =
                        self.child(&name)
                            .walk(child_src.as_ref(), relative, path_pred, action)?;
                    relative.pop();
                    all_ok &= ok;
                }
                if all_ok {
                    if let (Some(sequence), Some(src)) = (sequence, read_bytes_src) {
                        src.sequence_file().write_text(&sequence)?;
                    }
                }
                Ok(all_ok)
            }
        }
    }
}

/// Splits raw bytes into non-blank lines.
pub(crate) fn split_lines(data: &[u8]) -> Vec<String> {
    String::from_utf8_lossy(data)
        .split('\n')
        .filter(|line| !line.is_empty())
        .map(str::to_string)
        .collect()
}
