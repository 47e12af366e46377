//! File tree of a compendium's storage directory.
//!
//! A tree is built once per transform with [`build_tree`] and then projected
//! two ways: [`rewrite_paths`] swaps local paths for API paths, and
//! [`read_text_files`] flattens every text file into a list with its content
//! inlined.

use std::io;
use std::path::{Path, PathBuf};

use serde::Serialize;
use thiserror::Error;
use walkdir::WalkDir;

/// Extensions `mime_guess` does not know that are text in a compendium.
const TEXT_EXTENSIONS: &[(&str, &str)] = &[
    ("rmd", "text/markdown"),
    ("r", "text/x-r"),
    ("bib", "text/x-bibtex"),
    ("tex", "text/x-tex"),
];

fn guess_mime(path: &Path) -> Option<String> {
    let ext = path
        .extension()
        .and_then(|e| e.to_str())
        .map(str::to_ascii_lowercase);
    if let Some(ext) = ext.as_deref() {
        if let Some((_, mime)) = TEXT_EXTENSIONS.iter().find(|(e, _)| *e == ext) {
            return Some((*mime).to_string());
        }
    }
    mime_guess::from_path(path).first().map(|m| m.to_string())
}

/// A text file in the tree could not be read.
#[derive(Debug, Error)]
#[error("reading {}: {source}", .path.display())]
pub struct ReadError {
    pub path: PathBuf,
    #[source]
    pub source: io::Error,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum NodeKind {
    File,
    Directory,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct FileTreeNode {
    /// Display form of the path; local until [`rewrite_paths`] makes it an
    /// API path.
    pub path: String,
    /// Where the entry lives on disk. Names need not be UTF-8.
    #[serde(skip)]
    pub local: PathBuf,
    pub name: String,
    /// Bytes; for directories, the sum over all descendants.
    pub size: u64,
    #[serde(rename = "type")]
    pub kind: NodeKind,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub extension: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub mime: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub children: Option<Vec<FileTreeNode>>,
}

impl FileTreeNode {
    fn directory(path: &Path) -> Self {
        Self {
            path: path.to_string_lossy().into_owned(),
            local: path.to_path_buf(),
            name: file_name(path),
            size: 0,
            kind: NodeKind::Directory,
            extension: None,
            mime: None,
            children: Some(Vec::new()),
        }
    }

    fn file(path: &Path, size: u64) -> Self {
        Self {
            path: path.to_string_lossy().into_owned(),
            local: path.to_path_buf(),
            name: file_name(path),
            size,
            kind: NodeKind::File,
            extension: path
                .extension()
                .map(|e| format!(".{}", e.to_string_lossy().to_lowercase())),
            mime: guess_mime(path),
            children: None,
        }
    }

    fn push_child(&mut self, child: FileTreeNode) {
        self.size += child.size;
        self.children.get_or_insert_with(Vec::new).push(child);
    }

    pub fn is_text(&self) -> bool {
        self.kind == NodeKind::File
            && self
                .mime
                .as_deref()
                .is_some_and(|m| m.starts_with("text/"))
    }

    /// Depth-first visit of this node and all descendants.
    pub fn walk<'a>(&'a self, visit: &mut dyn FnMut(&'a FileTreeNode)) {
        visit(self);
        if let Some(children) = &self.children {
            for child in children {
                child.walk(visit);
            }
        }
    }
}

/// A text file flattened out of a tree, content inlined.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct TextFile {
    /// Path relative to the document root, with a leading `/`.
    pub path: String,
    #[serde(rename = "type")]
    pub mime: String,
    pub content: String,
}

fn file_name(path: &Path) -> String {
    path.file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_default()
}

/// Build the tree rooted at `root`. Entries are sorted by name so two walks
/// over an unchanged directory produce equal trees. Symlinks and other
/// special files are skipped.
pub fn build_tree(root: &Path) -> io::Result<FileTreeNode> {
    let mut stack: Vec<FileTreeNode> = Vec::new();

    for entry in WalkDir::new(root).follow_links(false).sort_by_file_name() {
        let entry = entry?;
        let depth = entry.depth();
        fold_to_depth(&mut stack, depth.max(1));

        let file_type = entry.file_type();
        if file_type.is_dir() {
            stack.push(FileTreeNode::directory(entry.path()));
        } else if file_type.is_file() {
            let node = FileTreeNode::file(entry.path(), entry.metadata()?.len());
            match stack.last_mut() {
                Some(parent) => parent.push_child(node),
                // The root itself is a plain file.
                None => return Ok(node),
            }
        }
    }

    fold_to_depth(&mut stack, 1);
    stack.pop().ok_or_else(|| {
        io::Error::new(
            io::ErrorKind::NotFound,
            format!("{} is not a directory", root.display()),
        )
    })
}

/// Close open directories until only `depth` remain on the stack, attaching
/// each closed directory to its parent.
fn fold_to_depth(stack: &mut Vec<FileTreeNode>, depth: usize) {
    while stack.len() > depth {
        if let Some(done) = stack.pop() {
            if let Some(parent) = stack.last_mut() {
                parent.push_child(done);
            }
        }
    }
}

/// Path of `path` below `root` as `/a/b`, or the empty string for the root.
pub fn relative_path(path: &Path, root: &Path) -> String {
    match path.strip_prefix(root) {
        Ok(rel) => rel
            .components()
            .map(|c| format!("/{}", c.as_os_str().to_string_lossy()))
            .collect(),
        Err(_) => path.to_string_lossy().into_owned(),
    }
}

/// Copy of `tree` with every local path replaced by `prefix` followed by the
/// path relative to `root`.
pub fn rewrite_paths(tree: &FileTreeNode, root: &Path, prefix: &str) -> FileTreeNode {
    let mut node = tree.clone();
    rewrite_in_place(&mut node, root, prefix);
    node
}

fn rewrite_in_place(node: &mut FileTreeNode, root: &Path, prefix: &str) {
    node.path = format!("{}{}", prefix, relative_path(&node.local, root));
    if let Some(children) = node.children.as_mut() {
        for child in children {
            rewrite_in_place(child, root, prefix);
        }
    }
}

/// Every text file in `tree`, in walk order, with content read from disk.
/// Invalid UTF-8 is replaced rather than rejected; an unreadable file is an
/// error naming that file.
pub fn read_text_files(tree: &FileTreeNode, root: &Path) -> Result<Vec<TextFile>, ReadError> {
    let mut text_nodes = Vec::new();
    tree.walk(&mut |node| {
        if node.is_text() {
            text_nodes.push(node);
        }
    });

    text_nodes
        .into_iter()
        .map(|node| {
            let bytes = std::fs::read(&node.local).map_err(|source| ReadError {
                path: node.local.clone(),
                source,
            })?;
            Ok(TextFile {
                path: relative_path(&node.local, root),
                mime: node.mime.clone().unwrap_or_default(),
                content: String::from_utf8_lossy(&bytes).into_owned(),
            })
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;
    use tempfile::TempDir;

    fn sample_tree() -> TempDir {
        let tmp = TempDir::new().unwrap();
        let root = tmp.path();
        fs::create_dir_all(root.join("sub/deeper")).unwrap();
        fs::write(root.join("main.Rmd"), "---\ntitle: paper\n---\n").unwrap();
        fs::write(root.join("sub/file.txt"), "hello").unwrap();
        fs::write(root.join("sub/deeper/data.csv"), "a,b\n1,2\n").unwrap();
        fs::write(root.join("plot.png"), [0x89u8, 0x50, 0x4e, 0x47]).unwrap();
        tmp
    }

    #[test]
    fn builds_nested_tree_sorted_by_name() {
        let tmp = sample_tree();
        let tree = build_tree(tmp.path()).unwrap();
        assert_eq!(tree.kind, NodeKind::Directory);

        let names: Vec<&str> = tree
            .children
            .as_ref()
            .unwrap()
            .iter()
            .map(|c| c.name.as_str())
            .collect();
        assert_eq!(names, vec!["main.Rmd", "plot.png", "sub"]);

        let sub = &tree.children.as_ref().unwrap()[2];
        assert_eq!(sub.kind, NodeKind::Directory);
        assert_eq!(sub.children.as_ref().unwrap().len(), 2);
        assert_eq!(sub.size, 5 + 8);
    }

    #[test]
    fn empty_directory_has_empty_children() {
        let tmp = TempDir::new().unwrap();
        let tree = build_tree(tmp.path()).unwrap();
        assert_eq!(tree.children, Some(Vec::new()));
        assert_eq!(tree.size, 0);
    }

    #[test]
    fn missing_directory_is_an_error() {
        let tmp = TempDir::new().unwrap();
        assert!(build_tree(&tmp.path().join("nope")).is_err());
    }

    #[test]
    fn rewrites_every_path_to_api_form() {
        let tmp = sample_tree();
        let tree = build_tree(tmp.path()).unwrap();
        let api = rewrite_paths(&tree, tmp.path(), "/api/v1/compendium/abc12/data");

        assert_eq!(api.path, "/api/v1/compendium/abc12/data");
        let mut paths = Vec::new();
        api.walk(&mut |n| paths.push(n.path.clone()));
        assert!(paths.contains(&"/api/v1/compendium/abc12/data/sub/file.txt".to_string()));
        assert!(paths.contains(&"/api/v1/compendium/abc12/data/sub/deeper/data.csv".to_string()));
        assert!(paths.iter().all(|p| p.starts_with("/api/v1/compendium/abc12/data")));
    }

    #[test]
    fn flattens_text_files_only() {
        let tmp = sample_tree();
        let tree = build_tree(tmp.path()).unwrap();
        let texts = read_text_files(&tree, tmp.path()).unwrap();

        let paths: Vec<&str> = texts.iter().map(|t| t.path.as_str()).collect();
        assert!(paths.contains(&"/sub/file.txt"));
        assert!(paths.contains(&"/sub/deeper/data.csv"));
        assert!(paths.contains(&"/main.Rmd"));
        assert!(!paths.contains(&"/plot.png"));

        let file = texts.iter().find(|t| t.path == "/sub/file.txt").unwrap();
        assert_eq!(file.content, "hello");
        assert_eq!(file.mime, "text/plain");
    }

    #[test]
    fn relative_path_of_root_is_empty() {
        let root = Path::new("/tmp/o2r/compendium/abc12");
        assert_eq!(relative_path(Path::new("/tmp/o2r/compendium/abc12"), root), "");
        assert_eq!(
            relative_path(Path::new("/tmp/o2r/compendium/abc12/sub/file.txt"), root),
            "/sub/file.txt"
        );
    }

    #[test]
    fn r_sources_count_as_text() {
        assert_eq!(guess_mime(Path::new("main.Rmd")).as_deref(), Some("text/markdown"));
        assert_eq!(guess_mime(Path::new("run.R")).as_deref(), Some("text/x-r"));
        assert_eq!(guess_mime(Path::new("refs.bib")).as_deref(), Some("text/x-bibtex"));
        assert_eq!(guess_mime(Path::new("notes.txt")).as_deref(), Some("text/plain"));
        assert_eq!(guess_mime(Path::new("plot.png")).as_deref(), Some("image/png"));
        assert_eq!(guess_mime(Path::new("Makefile")), None);
    }

    #[cfg(unix)]
    #[test]
    fn reads_files_with_non_utf8_names() {
        use std::ffi::OsStr;
        use std::os::unix::ffi::OsStrExt;

        let tmp = TempDir::new().unwrap();
        fs::write(tmp.path().join("notes.txt"), "plain").unwrap();
        fs::write(tmp.path().join(OsStr::from_bytes(b"caf\xe9.txt")), "latin-1 name").unwrap();

        let tree = build_tree(tmp.path()).unwrap();
        let texts = read_text_files(&tree, tmp.path()).unwrap();
        assert_eq!(texts.len(), 2);
        assert!(texts.iter().any(|t| t.content == "latin-1 name"));
        assert!(texts.iter().any(|t| t.path == "/caf\u{FFFD}.txt"));
    }

    #[test]
    fn unreadable_file_error_names_the_file() {
        let tmp = TempDir::new().unwrap();
        fs::write(tmp.path().join("gone.txt"), "soon deleted").unwrap();
        let tree = build_tree(tmp.path()).unwrap();
        fs::remove_file(tmp.path().join("gone.txt")).unwrap();

        let err = read_text_files(&tree, tmp.path()).unwrap_err();
        assert_eq!(err.path, tmp.path().join("gone.txt"));
        assert_eq!(err.source.kind(), io::ErrorKind::NotFound);
    }
}
