//! Persisted JSON shapes.
//!
//! Keys are camelCase so a snapshot reads the same as the browser-storage
//! layout the data originally came from. Decoding is lenient about legacy
//! values: ids may be numbers or numeric strings, and progress may be any
//! number (it is rounded and clamped on the way in).

use serde::de::{self, DeserializeOwned};
use serde::{Deserialize, Deserializer, Serialize};
use shelf_core::model::{Book, BookId, ReadingProgress, UserId, UserRecord, Username};

use crate::repository::StorageError;

pub(crate) fn decode<T: DeserializeOwned>(raw: &str) -> Result<T, StorageError> {
    serde_json::from_str(raw).map_err(|e| StorageError::Serialization(e.to_string()))
}

pub(crate) fn encode<T: Serialize>(value: &T) -> Result<String, StorageError> {
    serde_json::to_string(value).map_err(|e| StorageError::Serialization(e.to_string()))
}

#[derive(Deserialize)]
#[serde(untagged)]
enum NumberOrString {
    Number(u64),
    Text(String),
}

fn lenient_id<'de, D: Deserializer<'de>>(d: D) -> Result<u64, D::Error> {
    match NumberOrString::deserialize(d)? {
        NumberOrString::Number(n) => Ok(n),
        NumberOrString::Text(s) => s.trim().parse().map_err(de::Error::custom),
    }
}

fn lenient_percent<'de, D: Deserializer<'de>>(d: D) -> Result<u8, D::Error> {
    let raw = Option::<f64>::deserialize(d)?.unwrap_or(0.0);
    Ok(ReadingProgress::from_percent(raw).percent())
}

fn default_true() -> bool {
    true
}

/// Persisted shape for a book.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BookRecord {
    #[serde(deserialize_with = "lenient_id")]
    pub id: u64,
    pub title: String,
    pub author: String,
    pub year: i32,
    pub is_complete: bool,
    #[serde(default)]
    pub is_read: bool,
    #[serde(default, deserialize_with = "lenient_percent")]
    pub reading_progress: u8,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub content: Option<String>,
    #[serde(default)]
    pub is_pre_provided: bool,
    /// Written for layout compatibility; ignored on read.
    #[serde(default = "default_true")]
    pub is_custom: bool,
}

impl BookRecord {
    #[must_use]
    pub fn from_book(book: &Book) -> Self {
        Self {
            id: book.id().value(),
            title: book.title().to_owned(),
            author: book.author().to_owned(),
            year: book.year(),
            is_complete: book.is_complete(),
            is_read: book.is_read(),
            reading_progress: book.progress().percent(),
            content: book.content().map(str::to_owned),
            is_pre_provided: book.is_pre_provided(),
            is_custom: book.is_custom(),
        }
    }

    /// Convert the record back into a domain `Book`.
    ///
    /// `isCustom` is recomputed from `isPreProvided` rather than trusted.
    #[must_use]
    pub fn into_book(self) -> Book {
        Book::from_persisted(
            BookId::new(self.id),
            self.title,
            self.author,
            self.year,
            self.is_complete,
            self.is_read,
            ReadingProgress::clamped(i64::from(self.reading_progress)),
            self.content,
            self.is_pre_provided,
        )
    }
}

/// Persisted shape for a registered user.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StoredUser {
    #[serde(deserialize_with = "lenient_id")]
    pub id: u64,
    pub username: String,
    pub password_hash: String,
}

impl StoredUser {
    #[must_use]
    pub fn from_user(user: &UserRecord) -> Self {
        Self {
            id: user.id().value(),
            username: user.username().as_str().to_owned(),
            password_hash: user.password_hash().to_owned(),
        }
    }

    /// # Errors
    ///
    /// Returns `StorageError::Serialization` if the stored username is blank.
    pub fn into_user(self) -> Result<UserRecord, StorageError> {
        let username =
            Username::new(self.username).map_err(|e| StorageError::Serialization(e.to_string()))?;
        Ok(UserRecord::new(
            UserId::new(self.id),
            username,
            self.password_hash,
        ))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use shelf_core::model::BookDraft;

    #[test]
    fn decodes_legacy_record_with_string_id() {
        let raw = r#"[{"id":"1700000000000","title":"X","author":"Y","year":2020,"isComplete":false}]"#;
        let records: Vec<BookRecord> = decode(raw).unwrap();
        let book = records.into_iter().next().unwrap().into_book();

        assert_eq!(book.id(), BookId::new(1_700_000_000_000));
        assert_eq!(book.year(), 2020);
        assert!(!book.is_complete());
        assert!(!book.is_read());
        assert_eq!(book.progress().percent(), 0);
        assert!(book.is_custom());
    }

    #[test]
    fn clamps_out_of_range_progress_on_read() {
        let raw = r#"{"id":1,"title":"X","author":"Y","year":2020,"isComplete":true,"readingProgress":150.4}"#;
        let record: BookRecord = decode(raw).unwrap();
        assert_eq!(record.reading_progress, 100);

        let raw = r#"{"id":1,"title":"X","author":"Y","year":2020,"isComplete":true,"readingProgress":-3}"#;
        let record: BookRecord = decode(raw).unwrap();
        assert_eq!(record.reading_progress, 0);
    }

    #[test]
    fn is_custom_follows_pre_provided_not_the_stored_flag() {
        let raw = r#"{"id":1,"title":"X","author":"Y","year":2020,"isComplete":false,"isPreProvided":true,"isCustom":true}"#;
        let book = decode::<BookRecord>(raw).unwrap().into_book();
        assert!(book.is_pre_provided());
        assert!(!book.is_custom());
    }

    #[test]
    fn writes_camel_case_keys() {
        let draft = BookDraft::new("T", "A", 1999).with_content("preface");
        let book = Book::pre_provided(BookId::new(3), draft).unwrap();
        let json = encode(&BookRecord::from_book(&book)).unwrap();
        assert!(json.contains("\"isComplete\":false"));
        assert!(json.contains("\"readingProgress\":0"));
        assert!(json.contains("\"isPreProvided\":true"));
        assert!(json.contains("\"isCustom\":false"));
    }
}
