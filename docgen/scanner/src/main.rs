//! Reference research agent for docgen.
//!
//! Invoked as `docgen-scanner <source> <output>`. `PARAM_TOOL` picks the tool;
//! the result is written to `<output>/result.json`. Diagnostics go to stderr,
//! and any failure exits non-zero.

use std::fs;
use std::path::{Component, Path, PathBuf};
use std::process::ExitCode;

use anyhow::{Context, Result, bail};
use docgen::agent_env::{read_bool_param, read_int_param, read_param, read_tool};
use serde::Serialize;
use serde_json::{Value, json};
use tracing::{debug, error, info};
use walkdir::{DirEntry, WalkDir};

const RESULT_FILE: &str = "result.json";
const DEFAULT_MAX_DEPTH: i64 = 4;
const README_LINES: usize = 20;
const SKIPPED_DIRS: &[&str] = &["target", "node_modules"];

/// Manifest file name and the project kind it marks.
const MANIFESTS: &[(&str, &str)] = &[
    ("Cargo.toml", "rust"),
    ("package.json", "node"),
    ("go.mod", "go"),
    ("pyproject.toml", "python"),
    ("pom.xml", "maven"),
];

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
struct Project {
    path: String,
    kind: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
struct ProjectSummary {
    path: String,
    kinds: Vec<String>,
    file_count: usize,
    readme: Option<String>,
}

fn main() -> ExitCode {
    docgen::logging::init_with_default("info");

    match run(std::env::args_os().skip(1).map(PathBuf::from).collect()) {
        Ok(()) => ExitCode::SUCCESS,
        Err(err) => {
            error!("{err:#}");
            ExitCode::FAILURE
        }
    }
}

fn run(args: Vec<PathBuf>) -> Result<()> {
    let [source, output] = args.as_slice() else {
        bail!("usage: docgen-scanner <source> <output>");
    };
    let tool = read_tool().context("PARAM_TOOL is not set")?;
    info!(tool = %tool, source = %source.display(), "scanner invoked");

    let result = match tool.as_str() {
        "list_projects" => {
            let max_depth = read_int_param("maxDepth", DEFAULT_MAX_DEPTH).max(1);
            let include_hidden = read_bool_param("includeHidden", false);
            let projects = list_projects(source, max_depth as usize, include_hidden)?;
            json!({ "projects": projects })
        }
        "summarize_project" => {
            let rel = read_param("path").context("PARAM_PATH is not set")?;
            serde_json::to_value(summarize_project(source, &rel)?)?
        }
        other => bail!("unknown tool '{other}'"),
    };

    write_result(output, &result)
}

fn write_result(output: &Path, result: &Value) -> Result<()> {
    fs::create_dir_all(output).with_context(|| format!("create {}", output.display()))?;
    let path = output.join(RESULT_FILE);
    let mut payload = serde_json::to_string_pretty(result).context("serialize result")?;
    payload.push('\n');
    fs::write(&path, payload).with_context(|| format!("write {}", path.display()))?;
    debug!(path = %path.display(), "wrote result");
    Ok(())
}

/// Directories under `source` (inclusive, up to `max_depth` levels down)
/// that contain a known manifest, one entry per manifest found.
fn list_projects(source: &Path, max_depth: usize, include_hidden: bool) -> Result<Vec<Project>> {
    if !source.is_dir() {
        bail!("source {} is not a directory", source.display());
    }
    let mut projects = Vec::new();
    let walker = WalkDir::new(source)
        .max_depth(max_depth)
        .sort_by_file_name()
        .into_iter()
        .filter_entry(|entry| entry.depth() == 0 || keep_dir(entry, include_hidden));
    for entry in walker {
        let entry = entry.with_context(|| format!("walk {}", source.display()))?;
        if !entry.file_type().is_dir() {
            continue;
        }
        for kind in manifest_kinds(entry.path()) {
            projects.push(Project {
                path: relative_display(source, entry.path()),
                kind,
            });
        }
    }
    info!(count = projects.len(), "listed projects");
    Ok(projects)
}

fn keep_dir(entry: &DirEntry, include_hidden: bool) -> bool {
    if !entry.file_type().is_dir() {
        return true;
    }
    let name = entry.file_name().to_string_lossy();
    if SKIPPED_DIRS.iter().any(|skip| name == *skip) {
        return false;
    }
    include_hidden || !name.starts_with('.')
}

fn manifest_kinds(dir: &Path) -> Vec<String> {
    MANIFESTS
        .iter()
        .filter(|(file, _)| dir.join(file).is_file())
        .map(|(_, kind)| (*kind).to_string())
        .collect()
}

fn summarize_project(source: &Path, rel: &str) -> Result<ProjectSummary> {
    let rel_path = Path::new(rel);
    if rel_path
        .components()
        .any(|c| matches!(c, Component::ParentDir | Component::RootDir | Component::Prefix(_)))
    {
        bail!("path '{rel}' must stay inside the source");
    }
    let dir = source.join(rel_path);
    if !dir.is_dir() {
        bail!("project {} is not a directory", dir.display());
    }

    let file_count = WalkDir::new(&dir)
        .into_iter()
        .filter_entry(|entry| entry.depth() == 0 || keep_dir(entry, false))
        .filter_map(Result::ok)
        .filter(|entry| entry.file_type().is_file())
        .count();

    Ok(ProjectSummary {
        path: relative_display(source, &dir),
        kinds: manifest_kinds(&dir),
        file_count,
        readme: read_readme(&dir),
    })
}

fn read_readme(dir: &Path) -> Option<String> {
    let path = ["README.md", "README", "README.txt", "readme.md"]
        .iter()
        .map(|name| dir.join(name))
        .find(|path| path.is_file())?;
    let contents = fs::read_to_string(path).ok()?;
    let head: Vec<&str> = contents.lines().take(README_LINES).collect();
    Some(head.join("\n"))
}

/// `.` for the source itself, otherwise a `/`-separated relative path.
fn relative_display(source: &Path, path: &Path) -> String {
    let rel = path.strip_prefix(source).unwrap_or(path);
    let parts: Vec<String> = rel
        .components()
        .map(|c| c.as_os_str().to_string_lossy().into_owned())
        .collect();
    if parts.is_empty() {
        ".".to_string()
    } else {
        parts.join("/")
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn touch(root: &Path, rel: &str, contents: &str) {
        let path = root.join(rel);
        fs::create_dir_all(path.parent().expect("parent")).expect("mkdir");
        fs::write(path, contents).expect("write");
    }

    fn fixture() -> TempDir {
        let temp = tempfile::tempdir().expect("tempdir");
        let root = temp.path();
        touch(root, "Cargo.toml", "[workspace]\n");
        touch(root, "crates/core/Cargo.toml", "[package]\n");
        touch(root, "crates/core/src/lib.rs", "");
        touch(root, "web/package.json", "{}");
        touch(root, "web/README.md", "# Web\n\nFrontend.\n");
        touch(root, "web/node_modules/dep/package.json", "{}");
        touch(root, ".hidden/go.mod", "module x\n");
        touch(root, "a/b/c/d/e/pyproject.toml", "");
        temp
    }

    #[test]
    fn lists_manifests_in_name_order() {
        let temp = fixture();
        let projects = list_projects(temp.path(), 4, false).expect("list");
        let found: Vec<(&str, &str)> = projects
            .iter()
            .map(|p| (p.path.as_str(), p.kind.as_str()))
            .collect();
        assert_eq!(
            found,
            vec![(".", "rust"), ("crates/core", "rust"), ("web", "node")]
        );
    }

    #[test]
    fn hidden_and_deep_directories_are_opt_in() {
        let temp = fixture();
        let projects = list_projects(temp.path(), 6, true).expect("list");
        let paths: Vec<&str> = projects.iter().map(|p| p.path.as_str()).collect();
        assert!(paths.contains(&".hidden"));
        assert!(paths.contains(&"a/b/c/d/e"));
        assert!(!paths.iter().any(|p| p.contains("node_modules")));
    }

    #[test]
    fn summarizes_project_with_readme() {
        let temp = fixture();
        let summary = summarize_project(temp.path(), "web").expect("summary");
        assert_eq!(summary.kinds, vec!["node".to_string()]);
        assert_eq!(summary.file_count, 2);
        assert_eq!(summary.readme.as_deref(), Some("# Web\n\nFrontend."));
    }

    #[test]
    fn summary_rejects_escaping_paths() {
        let temp = fixture();
        let err = summarize_project(temp.path(), "../etc").expect_err("escape");
        assert!(err.to_string().contains("inside the source"));
    }

    #[test]
    fn missing_arguments_fail() {
        let err = run(vec![PathBuf::from("only-one")]).expect_err("usage");
        assert!(err.to_string().contains("usage"));
    }

    #[test]
    fn result_is_written_into_created_directory() {
        let temp = tempfile::tempdir().expect("tempdir");
        let output = temp.path().join("run/out");
        write_result(&output, &json!({ "projects": [] })).expect("write");
        let raw = fs::read_to_string(output.join(RESULT_FILE)).expect("read");
        assert_eq!(
            serde_json::from_str::<Value>(&raw).expect("json"),
            json!({ "projects": [] })
        );
    }
}
