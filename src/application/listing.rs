use colored::Colorize;
use derive_more::Display;

use crate::wrapper::{FileWrapper, WrapperContents};

/// Node and byte counts of a wrapper tree.
#[derive(Debug, Display, Clone, Copy, Default, PartialEq, Eq)]
#[display(
    "{directories} directories, {regular_files} files, {symbolic_links} links, {bytes} bytes"
)]
pub struct TreeSummary {
    pub directories: usize,
    pub regular_files: usize,
    pub symbolic_links: usize,
    pub bytes: u64,
}

impl From<&FileWrapper> for TreeSummary {
    fn from(wrapper: &FileWrapper) -> Self {
        let mut summary = TreeSummary::default();
        summary.add(wrapper);
        summary
    }
}

impl TreeSummary {
    fn add(&mut self, wrapper: &FileWrapper) {
        match wrapper.contents() {
            WrapperContents::Directory(children) => {
                self.directories += 1;
                children.values().for_each(|child| self.add(child));
            }
            WrapperContents::RegularFile(contents) => {
                self.regular_files += 1;
                self.bytes += contents.len() as u64;
            }
            WrapperContents::SymbolicLink(_) => self.symbolic_links += 1,
        }
    }
}

/// Renders `wrapper` as an indented tree, one node per line.
pub fn render_tree(wrapper: &FileWrapper, colorize: bool) -> String {
    let name = wrapper
        .filename()
        .or(wrapper.preferred_filename())
        .unwrap_or(".");

    let mut rendered = String::new();
    render_node(&mut rendered, wrapper, name, "", colorize);
    rendered
}

fn render_node(out: &mut String, wrapper: &FileWrapper, name: &str, prefix: &str, colorize: bool) {
    out.push_str(&describe(wrapper, name, colorize));
    out.push('\n');

    let WrapperContents::Directory(children) = wrapper.contents() else {
        return;
    };

    let count = children.len();
    for (index, (key, child)) in children.iter().enumerate() {
        let last = index + 1 == count;
        let (branch, indent) = if last {
            ("└── ", "    ")
        } else {
            ("├── ", "│   ")
        };
        out.push_str(prefix);
        out.push_str(branch);
        render_node(out, child, key, &format!("{prefix}{indent}"), colorize);
    }
}

fn describe(wrapper: &FileWrapper, name: &str, colorize: bool) -> String {
    match wrapper.contents() {
        WrapperContents::Directory(_) => {
            let label = format!("{name}/");
            if colorize {
                label.blue().bold().to_string()
            } else {
                label
            }
        }
        WrapperContents::RegularFile(contents) => format!("{name} ({} bytes)", contents.len()),
        WrapperContents::SymbolicLink(destination) => {
            let label = if colorize {
                name.cyan().to_string()
            } else {
                name.to_string()
            };
            format!("{label} -> {}", destination.display())
        }
    }
}
