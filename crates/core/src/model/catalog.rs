use crate::model::book::{Book, BookDraft};
use crate::model::ids::BookId;

const DEMO_BOOKS: &[(u64, &str, &str, i32, bool, &str)] = &[
    (
        1,
        "Max Havelaar",
        "Multatuli",
        1860,
        false,
        "A coffee broker's manuscript turns into an indictment of colonial rule in Java.",
    ),
    (
        2,
        "Sitti Nurbaya",
        "Marah Rusli",
        1922,
        false,
        "Two young people from Padang are parted by debt and family obligation.",
    ),
    (
        3,
        "Pride and Prejudice",
        "Jane Austen",
        1813,
        true,
        "Elizabeth Bennet and Mr. Darcy misjudge each other across five volumes of manners.",
    ),
    (
        4,
        "Moby-Dick",
        "Herman Melville",
        1851,
        false,
        "Ishmael signs on with a captain who hunts one particular whale.",
    ),
];

/// Books every demo session starts with.
#[must_use]
pub fn demo_catalog() -> Vec<Book> {
    DEMO_BOOKS
        .iter()
        .filter_map(|&(id, title, author, year, is_complete, content)| {
            let draft = BookDraft::new(title, author, year)
                .complete(is_complete)
                .with_content(content);
            Book::pre_provided(BookId::new(id), draft).ok()
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashSet;

    #[test]
    fn catalog_books_are_pre_provided_with_unique_ids() {
        let books = demo_catalog();
        assert_eq!(books.len(), DEMO_BOOKS.len());
        assert!(books.iter().all(Book::is_pre_provided));
        assert_eq!(books.iter().filter(|b| b.is_complete()).count(), 1);
        assert!(books.iter().all(|b| b.content().is_some()));

        let ids: HashSet<_> = books.iter().map(Book::id).collect();
        assert_eq!(ids.len(), books.len());
    }
}
