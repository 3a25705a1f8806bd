//! Shared helpers for integration tests.

use std::path::Path;

/// Write a catalog CSV with the standard header.
#[allow(dead_code)]
pub fn write_catalog(path: &Path, rows: &str) {
    std::fs::write(path, format!("title,author,description,genres\n{rows}")).unwrap();
}

/// Three-row fixture catalog.
#[allow(dead_code)]
pub const FIXTURE_ROWS: &str = "\
Dune,Frank Herbert,Epic science fiction on a desert planet,\"Science Fiction, Adventure\"
1984,George Orwell,Dystopian surveillance and truth control,Dystopia
The Martian,Andy Weir,A stranded astronaut survives on Mars,\"Science Fiction, Survival\"
";
