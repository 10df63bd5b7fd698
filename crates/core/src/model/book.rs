use thiserror::Error;

use crate::model::ids::BookId;
use crate::model::progress::ReadingProgress;

//
// ─── ERRORS ────────────────────────────────────────────────────────────────────
//

#[derive(Debug, Error, Clone, PartialEq, Eq)]
#[non_exhaustive]
pub enum BookError {
    #[error("book title cannot be empty")]
    EmptyTitle,

    #[error("book author cannot be empty")]
    EmptyAuthor,

    #[error("publication year must be between 1 and 9999, got {0}")]
    InvalidYear(i32),
}

fn required(value: &str, err: BookError) -> Result<String, BookError> {
    let trimmed = value.trim();
    if trimmed.is_empty() {
        return Err(err);
    }
    Ok(trimmed.to_owned())
}

fn check_year(year: i32) -> Result<i32, BookError> {
    if (1..=9999).contains(&year) {
        Ok(year)
    } else {
        Err(BookError::InvalidYear(year))
    }
}

//
// ─── DRAFTS ────────────────────────────────────────────────────────────────────
//

/// User input for a new book, before validation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BookDraft {
    pub title: String,
    pub author: String,
    pub year: i32,
    pub is_complete: bool,
    pub content: Option<String>,
}

impl BookDraft {
    #[must_use]
    pub fn new(title: impl Into<String>, author: impl Into<String>, year: i32) -> Self {
        Self {
            title: title.into(),
            author: author.into(),
            year,
            is_complete: false,
            content: None,
        }
    }

    #[must_use]
    pub fn complete(mut self, is_complete: bool) -> Self {
        self.is_complete = is_complete;
        self
    }

    #[must_use]
    pub fn with_content(mut self, content: impl Into<String>) -> Self {
        self.content = Some(content.into());
        self
    }

    /// Validate required fields.
    ///
    /// # Errors
    ///
    /// Returns `BookError` if title or author are blank or the year is out of range.
    pub fn validate(self) -> Result<ValidatedBook, BookError> {
        Ok(ValidatedBook {
            title: required(&self.title, BookError::EmptyTitle)?,
            author: required(&self.author, BookError::EmptyAuthor)?,
            year: check_year(self.year)?,
            is_complete: self.is_complete,
            content: self.content,
        })
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ValidatedBook {
    title: String,
    author: String,
    year: i32,
    is_complete: bool,
    content: Option<String>,
}

impl ValidatedBook {
    /// Turn into a user-added book. Read flag and progress start unset.
    #[must_use]
    pub fn assign_id(self, id: BookId) -> Book {
        Book {
            id,
            title: self.title,
            author: self.author,
            year: self.year,
            is_complete: self.is_complete,
            is_read: false,
            progress: ReadingProgress::MIN,
            content: self.content,
            is_pre_provided: false,
        }
    }
}

/// Partial update for an existing book. `None` leaves a field unchanged.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct BookPatch {
    pub title: Option<String>,
    pub author: Option<String>,
    pub year: Option<i32>,
    pub is_complete: Option<bool>,
    pub is_read: Option<bool>,
    pub content: Option<String>,
}

impl BookPatch {
    #[must_use]
    pub fn is_empty(&self) -> bool {
        *self == Self::default()
    }
}

//
// ─── BOOK ──────────────────────────────────────────────────────────────────────
//

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Book {
    id: BookId,
    title: String,
    author: String,
    year: i32,
    is_complete: bool,
    is_read: bool,
    progress: ReadingProgress,
    content: Option<String>,
    is_pre_provided: bool,
}

impl Book {
    /// A book that ships with the app rather than being added by the user.
    ///
    /// # Errors
    ///
    /// Returns `BookError` if the catalog entry is malformed.
    pub fn pre_provided(id: BookId, draft: BookDraft) -> Result<Self, BookError> {
        let mut book = draft.validate()?.assign_id(id);
        book.is_pre_provided = true;
        Ok(book)
    }

    /// Rebuild a book from storage without re-running input validation.
    #[allow(clippy::too_many_arguments, clippy::fn_params_excessive_bools)]
    #[must_use]
    pub fn from_persisted(
        id: BookId,
        title: String,
        author: String,
        year: i32,
        is_complete: bool,
        is_read: bool,
        progress: ReadingProgress,
        content: Option<String>,
        is_pre_provided: bool,
    ) -> Self {
        Self {
            id,
            title,
            author,
            year,
            is_complete,
            is_read,
            progress,
            content,
            is_pre_provided,
        }
    }

    #[must_use]
    pub fn id(&self) -> BookId {
        self.id
    }

    #[must_use]
    pub fn title(&self) -> &str {
        &self.title
    }

    #[must_use]
    pub fn author(&self) -> &str {
        &self.author
    }

    #[must_use]
    pub fn year(&self) -> i32 {
        self.year
    }

    #[must_use]
    pub fn is_complete(&self) -> bool {
        self.is_complete
    }

    #[must_use]
    pub fn is_read(&self) -> bool {
        self.is_read
    }

    #[must_use]
    pub fn progress(&self) -> ReadingProgress {
        self.progress
    }

    #[must_use]
    pub fn content(&self) -> Option<&str> {
        self.content.as_deref()
    }

    #[must_use]
    pub fn is_pre_provided(&self) -> bool {
        self.is_pre_provided
    }

    /// Always the inverse of [`Book::is_pre_provided`].
    #[must_use]
    pub fn is_custom(&self) -> bool {
        !self.is_pre_provided
    }

    /// Case-insensitive substring match on the title.
    #[must_use]
    pub fn title_matches(&self, needle: &str) -> bool {
        self.title.to_lowercase().contains(&needle.to_lowercase())
    }

    /// Merge the set fields of `patch` into this book.
    ///
    /// The patch is validated as a whole first; on error nothing changes.
    ///
    /// # Errors
    ///
    /// Returns `BookError` if a provided title/author is blank or year is out of range.
    pub fn apply_patch(&mut self, patch: BookPatch) -> Result<(), BookError> {
        let title = patch
            .title
            .map(|t| required(&t, BookError::EmptyTitle))
            .transpose()?;
        let author = patch
            .author
            .map(|a| required(&a, BookError::EmptyAuthor))
            .transpose()?;
        let year = patch.year.map(check_year).transpose()?;

        if let Some(title) = title {
            self.title = title;
        }
        if let Some(author) = author {
            self.author = author;
        }
        if let Some(year) = year {
            self.year = year;
        }
        if let Some(is_complete) = patch.is_complete {
            self.is_complete = is_complete;
        }
        if let Some(is_read) = patch.is_read {
            self.is_read = is_read;
        }
        if let Some(content) = patch.content {
            self.content = Some(content);
        }
        Ok(())
    }

    pub fn toggle_complete(&mut self) {
        self.is_complete = !self.is_complete;
    }

    pub fn toggle_read(&mut self) {
        self.is_read = !self.is_read;
    }

    /// Returns true if the stored progress changed.
    pub fn set_progress(&mut self, progress: ReadingProgress) -> bool {
        let changed = self.progress != progress;
        self.progress = progress;
        changed
    }
}

//
// ─── TESTS ─────────────────────────────────────────────────────────────────────
//
