//! Offset-keyed text edits. The resolver emits an ordered batch of
//! insertions and removals; `apply` replays them against the original
//! source in one pass.

#[derive(Debug, Clone, PartialEq)]
enum EditKind {
    InsertBefore(String),
    InsertAfter(String),
    Remove(usize),
}

#[derive(Debug, Clone, PartialEq)]
struct Edit {
    offset: usize,
    seq: usize,
    kind: EditKind,
}

impl Edit {
    fn rank(&self) -> u8 {
        match self.kind {
            EditKind::InsertBefore(_) => 0,
            EditKind::Remove(_) => 1,
            EditKind::InsertAfter(_) => 2,
        }
    }
}

#[derive(Debug, Default)]
pub struct RewriteBatch {
    edits: Vec<Edit>,
}

impl RewriteBatch {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn is_empty(&self) -> bool {
        self.edits.is_empty()
    }

    pub fn len(&self) -> usize {
        self.edits.len()
    }

    fn push(&mut self, offset: usize, kind: EditKind) {
        let seq = self.edits.len();
        self.edits.push(Edit { offset, seq, kind });
    }

    pub fn insert_before(&mut self, offset: usize, text: impl Into<String>) {
        self.push(offset, EditKind::InsertBefore(text.into()));
    }

    pub fn insert_after(&mut self, offset: usize, text: impl Into<String>) {
        self.push(offset, EditKind::InsertAfter(text.into()));
    }

    pub fn remove_range(&mut self, offset: usize, len: usize) {
        if len > 0 {
            self.push(offset, EditKind::Remove(len));
        }
    }

    /// Replay the batch. Edits at the same offset apply insert-before
    /// first, then removals, then insert-after, each group in call
    /// order.
    pub fn apply(&self, source: &str) -> String {
        let mut edits: Vec<&Edit> = self.edits.iter().collect();
        edits.sort_by_key(|e| (e.offset, e.rank(), e.seq));

        let mut out = String::with_capacity(source.len() + 128 * self.edits.len());
        let mut cursor = 0usize;
        for e in edits {
            let at = e.offset.min(source.len());
            if at > cursor {
                out.push_str(&source[cursor..at]);
                cursor = at;
            }
            match &e.kind {
                EditKind::InsertBefore(text) | EditKind::InsertAfter(text) => out.push_str(text),
                EditKind::Remove(len) => {
                    cursor = cursor.max(at + len).min(source.len());
                }
            }
        }
        out.push_str(&source[cursor..]);
        out
    }
}
