use log::warn;
use std::fs;
use std::path::Path;

/// Engines, avatar weights and opening books available on disk
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Catalog {
    pub engines: Vec<String>,
    pub weights: Vec<String>,
    pub books: Vec<String>,
}

fn file_names(dir: &Path) -> Vec<String> {
    let entries = match fs::read_dir(dir) {
        Ok(entries) => entries,
        Err(e) => {
            warn!("Cannot list {}: {}", dir.display(), e);
            return Vec::new();
        }
    };
    let mut names: Vec<String> = entries
        .filter_map(|entry| entry.ok())
        .filter(|entry| entry.file_type().map(|t| t.is_file()).unwrap_or(false))
        .filter_map(|entry| entry.file_name().into_string().ok())
        .filter(|name| !name.starts_with('.'))
        .collect();
    names.sort();
    names
}

impl Catalog {
    pub fn scan(engines_dir: &Path, books_dir: &Path) -> Self {
        let mut engines: Vec<String> = file_names(engines_dir)
            .into_iter()
            .map(|name| name.strip_suffix(".exe").map(str::to_string).unwrap_or(name))
            .collect();
        engines.sort();
        engines.dedup();
        let weights = file_names(&engines_dir.join("avatar_weights"))
            .into_iter()
            .filter_map(|name| name.strip_suffix(".zip").map(str::to_string))
            .collect();
        Catalog {
            engines,
            weights,
            books: file_names(books_dir),
        }
    }

    /// Engines named `rom*` replay a fixed repertoire and cannot take moves back
    pub fn is_rom(engine: &str) -> bool {
        engine.starts_with("rom")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_scan() {
        let root = std::env::temp_dir().join(format!("catalog-{}", uuid::Uuid::new_v4()));
        let engines = root.join("engines");
        let books = root.join("books");
        fs::create_dir_all(engines.join("avatar_weights")).unwrap();
        fs::create_dir_all(&books).unwrap();
        for name in ["stockfish.exe", "rom-lowe", "avatar"] {
            fs::write(engines.join(name), b"").unwrap();
        }
        fs::write(engines.join("avatar_weights").join("tal.zip"), b"").unwrap();
        fs::write(engines.join("avatar_weights").join("notes.txt"), b"").unwrap();
        fs::write(books.join("gm.tsv"), b"uci\n").unwrap();

        let catalog = Catalog::scan(&engines, &books);
        assert_eq!(catalog.engines, vec!["avatar", "rom-lowe", "stockfish"]);
        assert_eq!(catalog.weights, vec!["tal"]);
        assert_eq!(catalog.books, vec!["gm.tsv"]);
        assert!(Catalog::is_rom("rom-lowe"));
        fs::remove_dir_all(root).unwrap();
    }
}
