// ABOUTME: Folder listing derived from book paths; folders have no rows of their own.
// ABOUTME: A folder exists only while some book lives in it or below it.

use std::collections::BTreeSet;

use folio_core::model::{Book, normalize_path};
use serde::Serialize;

/// The contents of one folder.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct FolderListing {
    pub path: Vec<String>,
    /// Names of the immediate subfolders, sorted.
    pub folders: Vec<String>,
    /// Books whose path is exactly this folder, in input order.
    pub books: Vec<Book>,
}

impl FolderListing {
    pub fn is_empty(&self) -> bool {
        self.folders.is_empty() && self.books.is_empty()
    }
}

/// List the folder at `path` given every book in the library.
pub fn list_folder(books: &[Book], path: &[String]) -> FolderListing {
    let path = normalize_path(path);
    let mut folders = BTreeSet::new();
    let mut direct = Vec::new();

    for book in books {
        if !book.path.starts_with(&path) {
            continue;
        }
        match book.path.get(path.len()) {
            Some(child) => {
                folders.insert(child.clone());
            }
            None => direct.push(book.clone()),
        }
    }

    FolderListing {
        path,
        folders: folders.into_iter().collect(),
        books: direct,
    }
}

/// Parse a `a/b/c` folder argument into path segments.
pub fn parse_folder(folder: &str) -> Vec<String> {
    normalize_path(&folder.split('/').map(String::from).collect::<Vec<_>>())
}
