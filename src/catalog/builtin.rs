//! Built-in fallback catalog used when no CSV is available.

use super::types::Book;

fn book(id: u32, title: &str, author: &str, description: &str, genres: &[&str]) -> Book {
    Book {
        id,
        title: title.to_string(),
        author: author.to_string(),
        description: description.to_string(),
        genres: genres.iter().map(|g| (*g).to_string()).collect(),
        cover: None,
    }
}

/// The default catalog shipped with the binary.
pub fn default_books() -> Vec<Book> {
    vec![
        book(
            1,
            "Dune",
            "Frank Herbert",
            "Epic science fiction about politics, religion, and desert planet Arrakis.",
            &["Science Fiction", "Adventure"],
        ),
        book(
            2,
            "Pride and Prejudice",
            "Jane Austen",
            "A witty social commentary and romance centered on Elizabeth Bennet.",
            &["Romance", "Classic"],
        ),
        book(
            3,
            "The Hobbit",
            "J.R.R. Tolkien",
            "A reluctant hobbit goes on an adventure with dwarves to reclaim treasure.",
            &["Fantasy", "Adventure"],
        ),
        book(
            4,
            "1984",
            "George Orwell",
            "Dystopian novel about surveillance, totalitarianism and truth control.",
            &["Dystopia", "Political Fiction"],
        ),
        book(
            5,
            "The Martian",
            "Andy Weir",
            "A stranded astronaut uses engineering and humor to survive on Mars.",
            &["Science Fiction", "Survival"],
        ),
        book(
            6,
            "Neuromancer",
            "William Gibson",
            "Cyberpunk classic; a washed-up hacker is hired for one last job.",
            &["Science Fiction", "Cyberpunk"],
        ),
        book(
            7,
            "The Hunger Games",
            "Suzanne Collins",
            "A dystopian tale of survival and rebellion in a totalitarian society.",
            &["Dystopia", "Adventure", "Young Adult"],
        ),
        book(
            8,
            "Harry Potter and the Sorcerer's Stone",
            "J.K. Rowling",
            "A young wizard discovers his magical heritage and attends Hogwarts.",
            &["Fantasy", "Adventure", "Young Adult"],
        ),
        book(
            9,
            "Gone Girl",
            "Gillian Flynn",
            "A psychological thriller about a marriage gone wrong.",
            &["Thriller", "Mystery", "Psychological"],
        ),
        book(
            10,
            "Sapiens",
            "Yuval Noah Harari",
            "A brief history of humankind exploring cognitive, agricultural, and scientific revolutions.",
            &["Nonfiction", "History"],
        ),
        book(
            11,
            "The Fault in Our Stars",
            "John Green",
            "A love story between two teenagers with cancer.",
            &["Romance", "Young Adult", "Contemporary Fiction"],
        ),
        book(
            12,
            "Atomic Habits",
            "James Clear",
            "A guide to building good habits and breaking bad ones.",
            &["Nonfiction", "Self-Help", "Psychology"],
        ),
    ]
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_catalog_has_twelve_books_with_contiguous_ids() {
        let books = default_books();
        assert_eq!(books.len(), 12);
        for (i, book) in books.iter().enumerate() {
            assert_eq!(book.id, i as u32 + 1);
            assert!(!book.title.is_empty());
            assert!(!book.genres.is_empty());
        }
    }
}
