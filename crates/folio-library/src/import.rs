// ABOUTME: Turns imported material into the store's NewBook shape.
// ABOUTME: Plain text is split on blank lines; externally parsed books are trimmed of empty content.

use folio_core::model::{NewBook, NewChapter, NewParagraph, normalize_path};

/// Split plain text into paragraphs. Paragraphs are separated by one or more
/// blank (or whitespace-only) lines; lines inside a paragraph are joined with
/// a single space.
pub fn split_paragraphs(text: &str) -> Vec<String> {
    let mut paragraphs = Vec::new();
    let mut current: Vec<&str> = Vec::new();

    for line in text.lines() {
        let line = line.trim();
        if line.is_empty() {
            if !current.is_empty() {
                paragraphs.push(current.join(" "));
                current.clear();
            }
        } else {
            current.push(line);
        }
    }
    if !current.is_empty() {
        paragraphs.push(current.join(" "));
    }
    paragraphs
}

/// A single-chapter book built from plain text.
pub fn book_from_text(title: &str, text: &str, path: &[String]) -> NewBook {
    NewBook {
        title: title.trim().to_string(),
        path: normalize_path(path),
        chapters: vec![NewChapter {
            title: None,
            paragraphs: split_paragraphs(text)
                .into_iter()
                .map(NewParagraph::plain)
                .collect(),
        }],
    }
}

/// Normalize an externally parsed book: trims titles and text, drops empty
/// paragraphs and the chapters they leave empty.
pub fn clean_book(book: NewBook) -> NewBook {
    let chapters = book
        .chapters
        .into_iter()
        .map(|chapter| NewChapter {
            title: chapter
                .title
                .map(|t| t.trim().to_string())
                .filter(|t| !t.is_empty()),
            paragraphs: chapter
                .paragraphs
                .into_iter()
                .filter_map(|paragraph| {
                    let text = paragraph.text.trim();
                    (!text.is_empty()).then(|| NewParagraph {
                        text: text.to_string(),
                        html: paragraph.html,
                    })
                })
                .collect(),
        })
        .filter(|chapter| !chapter.paragraphs.is_empty())
        .collect();

    NewBook {
        title: book.title.trim().to_string(),
        path: normalize_path(&book.path),
        chapters,
    }
}

pub fn paragraph_count(book: &NewBook) -> usize {
    book.chapters.iter().map(|c| c.paragraphs.len()).sum()
}
