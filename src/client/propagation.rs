//! Edit Propagation Channel: live text and cursor traffic for the active
//! document.
//!
//! Text goes out as one change per local edit, shaped by a pluggable
//! [`PropagationStrategy`]. The default [`WholeBufferReplace`] sends the
//! whole buffer every time; it is correct for one typist at a time and
//! loses concurrent keystrokes otherwise. A delta or CRDT strategy can
//! replace it without touching the rest of the core.
//!
//! Local cursor moves are debounced; remote cursors are kept per user,
//! last update wins.

use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;

use super::connection::ConnectionManager;
use super::scheduler::{ScheduledTask, Ticket};
use crate::domain::{CursorSet, DocumentId, RemoteCursor, UserId};
use crate::protocol::{ChangeKind, ClientFrame, TextChange};

/// Converts local edits to wire changes and applies remote ones.
pub trait PropagationStrategy: Send + Sync + fmt::Debug {
    /// Describes the transition from `previous` to `current`.
    fn outbound(&self, previous: &str, current: &str) -> TextChange;

    /// Applies a remote change to `local`. Returns the new buffer, or
    /// `None` if the change leaves the buffer as it is.
    fn apply(&self, local: &str, change: &TextChange) -> Option<String>;
}

/// Full-buffer replacement: every change carries the entire content.
#[derive(Debug, Default, Clone, Copy)]
pub struct WholeBufferReplace;

impl PropagationStrategy for WholeBufferReplace {
    fn outbound(&self, previous: &str, current: &str) -> TextChange {
        TextChange::replace_all(current, previous.chars().count())
    }

    fn apply(&self, local: &str, change: &TextChange) -> Option<String> {
        let next = match change.kind {
            ChangeKind::Replace => change.content.clone(),
            ChangeKind::Insert => splice(local, change.position, 0, &change.content),
            ChangeKind::Delete => splice(local, change.position, change.length, ""),
        };
        (next != local).then_some(next)
    }
}

/// Replaces `length` characters at character offset `position`, clamping
/// both to the buffer.
fn splice(text: &str, position: usize, length: usize, insert: &str) -> String {
    let chars: Vec<char> = text.chars().collect();
    let start = position.min(chars.len());
    let end = start.saturating_add(length).min(chars.len());
    let mut out = String::with_capacity(text.len() + insert.len());
    out.extend(chars.iter().take(start));
    out.push_str(insert);
    out.extend(chars.iter().skip(end));
    out
}

/// Caret and selection of the local user.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LocalCursor {
    /// Absolute caret offset.
    pub position: usize,
    /// Selection anchor.
    pub selection_start: Option<usize>,
    /// Selection end.
    pub selection_end: Option<usize>,
}

/// Callback invoked when the cursor debounce window closes.
pub type CursorWake = Arc<dyn Fn(Ticket) + Send + Sync>;

/// Live edit and cursor propagation for one active document at a time.
pub struct EditChannel {
    connection: ConnectionManager,
    strategy: Box<dyn PropagationStrategy>,
    cursor_delay: Duration,
    on_cursor_due: CursorWake,
    document_id: Option<DocumentId>,
    content: String,
    cursors: CursorSet,
    cursor_timer: ScheduledTask,
    pending_cursor: Option<LocalCursor>,
}

impl fmt::Debug for EditChannel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("EditChannel")
            .field("strategy", &self.strategy)
            .field("cursor_delay", &self.cursor_delay)
            .field("document_id", &self.document_id)
            .field("content_len", &self.content.len())
            .field("cursors", &self.cursors.len())
            .field("pending_cursor", &self.pending_cursor)
            .finish_non_exhaustive()
    }
}

impl EditChannel {
    /// Creates a detached channel.
    ///
    /// `on_cursor_due` is called from a timer task when a debounced cursor
    /// update should be flushed with [`EditChannel::flush_cursor`].
    #[must_use]
    pub fn new(
        connection: ConnectionManager,
        strategy: Box<dyn PropagationStrategy>,
        cursor_delay: Duration,
        on_cursor_due: CursorWake,
    ) -> Self {
        Self {
            connection,
            strategy,
            cursor_delay,
            on_cursor_due,
            document_id: None,
            content: String::new(),
            cursors: CursorSet::new(),
            cursor_timer: ScheduledTask::new(),
            pending_cursor: None,
        }
    }

    /// Starts propagating for `document_id` with `content` as the known
    /// local buffer.
    pub fn attach(&mut self, document_id: DocumentId, content: String) {
        self.detach();
        self.document_id = Some(document_id);
        self.content = content;
    }

    /// Stops propagating: cancels the pending cursor update and forgets
    /// remote cursors.
    pub fn detach(&mut self) {
        self.cursor_timer.cancel();
        self.pending_cursor = None;
        self.cursors.clear();
        self.document_id = None;
        self.content.clear();
    }

    /// The attached document.
    #[must_use]
    pub const fn document_id(&self) -> Option<DocumentId> {
        self.document_id
    }

    /// Last known local buffer.
    #[must_use]
    pub fn content(&self) -> &str {
        &self.content
    }

    /// Broadcasts a local edit. Returns `false` if nothing was sent.
    pub fn local_edit(&mut self, content: String) -> bool {
        let Some(document_id) = self.document_id else {
            return false;
        };
        if content == self.content {
            return false;
        }
        let change = self.strategy.outbound(&self.content, &content);
        self.connection
            .send(&ClientFrame::TextChange { document_id, change });
        self.content = content;
        true
    }

    /// Re-broadcasts the whole buffer, e.g. after a revert.
    pub fn broadcast_buffer(&mut self, content: String) {
        let Some(document_id) = self.document_id else {
            return;
        };
        let change = self.strategy.outbound(&self.content, &content);
        self.connection
            .send(&ClientFrame::TextChange { document_id, change });
        self.content = content;
    }

    /// Applies a remote change for `document_id`.
    ///
    /// Returns the new buffer when it changed. Changes for other documents
    /// and echoes of the current buffer return `None`.
    pub fn apply_remote(&mut self, document_id: DocumentId, change: &TextChange) -> Option<String> {
        if self.document_id != Some(document_id) {
            tracing::debug!(%document_id, "ignoring text change for inactive document");
            return None;
        }
        let next = self.strategy.apply(&self.content, change)?;
        self.content.clone_from(&next);
        Some(next)
    }

    /// Records a local cursor move and (re)arms the debounce timer.
    pub fn local_cursor(&mut self, cursor: LocalCursor) {
        if self.document_id.is_none() {
            return;
        }
        self.pending_cursor = Some(cursor);
        let wake = Arc::clone(&self.on_cursor_due);
        self.cursor_timer
            .arm(self.cursor_delay, move |ticket| wake(ticket));
    }

    /// Sends the pending cursor update if `ticket` is the live one.
    /// Returns `true` if a frame was sent.
    pub fn flush_cursor(&mut self, ticket: Ticket) -> bool {
        if !self.cursor_timer.claim(ticket) {
            return false;
        }
        match (self.document_id, self.pending_cursor.take()) {
            (Some(document_id), Some(cursor)) => {
                self.connection.send(&ClientFrame::CursorUpdate {
                    document_id,
                    position: cursor.position,
                    selection_start: cursor.selection_start,
                    selection_end: cursor.selection_end,
                });
                true
            }
            _ => false,
        }
    }

    /// Stores a remote cursor for the attached document. Returns `true` if
    /// it was accepted.
    pub fn remote_cursor(&mut self, document_id: DocumentId, cursor: RemoteCursor) -> bool {
        if self.document_id != Some(document_id) {
            return false;
        }
        self.cursors.upsert(RemoteCursor {
            last_updated: Utc::now(),
            ..cursor
        });
        true
    }

    /// Prunes the cursor of a user who left the attached document.
    /// Returns `true` if a cursor was removed.
    pub fn remote_left(&mut self, document_id: DocumentId, user_id: &UserId) -> bool {
        self.document_id == Some(document_id) && self.cursors.remove(user_id)
    }

    /// Remote cursors ordered by user id.
    #[must_use]
    pub fn cursors(&self) -> Vec<RemoteCursor> {
        self.cursors.to_sorted_vec()
    }
}
