use std::fs;
use std::path::{Path, PathBuf};
use std::process::Command;

use camino::Utf8Path;

use crate::domain::Pmid;
use crate::error::CellError;

pub trait AnnotationTool: Send + Sync {
    fn annotate(&self, pmid: &Pmid, output: &Utf8Path) -> Result<(), CellError>;
}

/// `ontogpt pubmed-annotate` invoked as a subprocess.
#[derive(Debug, Clone)]
pub struct OntoGptCli {
    program: Option<PathBuf>,
    program_name: String,
    template: String,
    limit: u32,
}

impl OntoGptCli {
    pub fn new(program: &str, template: &str, limit: u32) -> Self {
        let resolved = if Path::new(program).components().count() > 1 {
            Some(PathBuf::from(program)).filter(|path| path.exists())
        } else {
            find_in_path(program)
        };
        Self {
            program: resolved,
            program_name: program.to_string(),
            template: template.to_string(),
            limit,
        }
    }

    pub fn args(&self, pmid: &Pmid, output: &Utf8Path) -> Vec<String> {
        vec![
            "pubmed-annotate".to_string(),
            "--template".to_string(),
            self.template.clone(),
            pmid.as_str().to_string(),
            "--limit".to_string(),
            self.limit.to_string(),
            "--output".to_string(),
            output.to_string(),
        ]
    }

    pub fn version(&self) -> Option<String> {
        self.program
            .as_ref()
            .and_then(|path| tool_version(path, &["--version"]))
    }
}

impl AnnotationTool for OntoGptCli {
    fn annotate(&self, pmid: &Pmid, output: &Utf8Path) -> Result<(), CellError> {
        let program = self
            .program
            .as_ref()
            .ok_or_else(|| CellError::MissingTool(self.program_name.clone()))?;
        let result = Command::new(program).args(self.args(pmid, output)).output();

        let failure = match result {
            Ok(out) if out.status.success() => return Ok(()),
            Ok(out) => {
                let stderr = String::from_utf8_lossy(&out.stderr).trim().to_string();
                if stderr.is_empty() {
                    format!("{} exited with {}", self.program_name, out.status)
                } else {
                    stderr
                }
            }
            Err(err) => err.to_string(),
        };

        // A failed run must not leave output that looks complete.
        if output.as_std_path().exists() {
            fs::remove_file(output.as_std_path())
                .map_err(|err| CellError::Filesystem(format!("remove {output}: {err}")))?;
        }
        Err(CellError::AnnotationFailed {
            pmid: pmid.to_string(),
            message: failure,
        })
    }
}

pub fn find_in_path(name: &str) -> Option<PathBuf> {
    let path_var = std::env::var_os("PATH")?;
    for path in std::env::split_paths(&path_var) {
        let exe = path.join(format!("{name}.exe"));
        if exe.exists() {
            return Some(exe);
        }
        let plain = path.join(name);
        if plain.is_file() {
            return Some(plain);
        }
    }
    None
}

fn tool_version(path: &Path, args: &[&str]) -> Option<String> {
    let output = Command::new(path).args(args).output().ok()?;
    if !output.status.success() {
        return None;
    }
    let stdout = String::from_utf8_lossy(&output.stdout).trim().to_string();
    if stdout.is_empty() { None } else { Some(stdout) }
}

#[cfg(test)]
mod tests {
    use assert_matches::assert_matches;

    use super::*;

    #[test]
    fn arguments_follow_pubmed_annotate_layout() {
        let cli = OntoGptCli::new("ontogpt", "cell_type", 1);
        let pmid: Pmid = "38540357".parse().unwrap();
        let args = cli.args(&pmid, Utf8Path::new("ontogpt/38540357.out"));
        assert_eq!(
            args,
            vec![
                "pubmed-annotate",
                "--template",
                "cell_type",
                "38540357",
                "--limit",
                "1",
                "--output",
                "ontogpt/38540357.out",
            ]
        );
    }

    #[test]
    fn missing_program_is_reported() {
        let cli = OntoGptCli::new("definitely-not-installed-ontogpt", "cell_type", 1);
        let pmid: Pmid = "1".parse().unwrap();
        let err = cli
            .annotate(&pmid, Utf8Path::new("unused.out"))
            .unwrap_err();
        assert_matches!(err, CellError::MissingTool(_));
    }

    #[cfg(unix)]
    #[test]
    fn failing_run_removes_partial_output() {
        let temp = tempfile::tempdir().unwrap();
        let output = camino::Utf8PathBuf::from_path_buf(temp.path().join("1.out")).unwrap();
        std::fs::write(output.as_std_path(), b"partial").unwrap();

        let cli = OntoGptCli::new("/bin/false", "cell_type", 1);
        if cli.program.is_none() {
            return;
        }
        let pmid: Pmid = "1".parse().unwrap();
        let err = cli.annotate(&pmid, &output).unwrap_err();
        assert_matches!(err, CellError::AnnotationFailed { .. });
        assert!(!output.as_std_path().exists());
    }
}
