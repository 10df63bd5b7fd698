mod book;
mod catalog;
mod ids;
mod progress;
mod session;
mod user;

pub use book::{Book, BookDraft, BookError, BookPatch, ValidatedBook};
pub use catalog::demo_catalog;
pub use ids::{BookId, ParseIdError, UserId};
pub use progress::ReadingProgress;
pub use session::{PartitionKey, Session};
pub use user::{UserError, UserRecord, Username};
