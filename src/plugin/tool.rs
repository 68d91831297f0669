use std::io::Write;
use std::process::{Command, Stdio};

use crate::asset::Asset;
use crate::error::ExternalToolError;
use crate::pipeline::Transform;

/// A transform delegated to an external program.
///
/// The record is written to the program's standard input and replaced by
/// whatever the program prints to standard output. A non-zero exit status
/// fails the record with the program's standard error.
#[derive(Debug, Clone)]
pub struct Tool {
    name: String,
    program: String,
    args: Vec<String>,
    extension: Option<String>,
}

impl Tool {
    pub fn new(program: impl Into<String>) -> Self {
        let program = program.into();
        Self {
            name: program.clone(),
            program,
            args: Vec::new(),
            extension: None,
        }
    }

    /// Runs `program` instead, keeping name and arguments.
    pub fn program(mut self, program: impl Into<String>) -> Self {
        self.program = program.into();
        self
    }

    pub fn program_name(&self) -> &str {
        &self.program
    }

    pub fn arg(mut self, arg: impl Into<String>) -> Self {
        self.args.push(arg.into());
        self
    }

    pub fn args<I, S>(mut self, args: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.args.extend(args.into_iter().map(Into::into));
        self
    }

    /// Changes the extension of every record passing through.
    pub fn extension(mut self, extension: impl Into<String>) -> Self {
        self.extension = Some(extension.into());
        self
    }

    /// The CoffeeScript compiler, producing `.js` records.
    pub fn coffee() -> Self {
        Self::new("coffee")
            .args(["--stdio", "--print", "--compile"])
            .extension("js")
    }

    /// UglifyJS, compressing and mangling JavaScript.
    pub fn uglify() -> Self {
        Self::new("uglifyjs").args(["--compress", "--mangle"])
    }

    fn invoke(&self, input: Vec<u8>) -> Result<Vec<u8>, ExternalToolError> {
        let mut child = Command::new(&self.program)
            .args(&self.args)
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .spawn()
            .map_err(|source| ExternalToolError::Spawn {
                tool: self.name.clone(),
                source,
            })?;

        // stdin must be fed while stdout is being drained.
        let stdin = child.stdin.take();
        let feeder = std::thread::spawn(move || match stdin {
            Some(mut stdin) => stdin.write_all(&input),
            None => Ok(()),
        });

        let output = child.wait_with_output().map_err(|source| ExternalToolError::Io {
            tool: self.name.clone(),
            source,
        })?;

        let fed = feeder
            .join()
            .unwrap_or_else(|_| Err(std::io::Error::other("stdin writer panicked")));

        if !output.status.success() {
            return Err(ExternalToolError::Failed {
                tool: self.name.clone(),
                status: output.status,
                stderr: String::from_utf8_lossy(&output.stderr).trim().to_string(),
            });
        }

        fed.map_err(|source| ExternalToolError::Io {
            tool: self.name.clone(),
            source,
        })?;

        Ok(output.stdout)
    }
}

impl Transform for Tool {
    fn name(&self) -> &str {
        &self.name
    }

    fn apply(&self, mut asset: Asset) -> anyhow::Result<Asset> {
        asset.data = self.invoke(std::mem::take(&mut asset.data))?;

        if let Some(extension) = &self.extension {
            asset.path.set_extension(extension);
        }

        Ok(asset)
    }
}

#[cfg(all(test, unix))]
mod tests {
    use super::*;

    #[test]
    fn test_pipes_through_program() {
        let tool = Tool::new("tr").args(["a-z", "A-Z"]).extension("txt");
        let out = tool.apply(Asset::new("x.md", "x.md", "hello")).unwrap();

        assert_eq!(out.text().unwrap(), "HELLO");
        assert_eq!(out.path, "x.txt");
    }

    #[test]
    fn test_failure_carries_stderr() {
        let tool = Tool::new("sh").args(["-c", "echo broken >&2; exit 3"]);
        let err = tool.invoke(b"input".to_vec()).unwrap_err();

        match err {
            ExternalToolError::Failed { stderr, status, .. } => {
                assert_eq!(stderr, "broken");
                assert_eq!(status.code(), Some(3));
            }
            other => panic!("unexpected error: {other}"),
        }
    }

    #[test]
    fn test_missing_program() {
        let tool = Tool::new("assetline-no-such-program");
        assert!(matches!(
            tool.invoke(Vec::new()),
            Err(ExternalToolError::Spawn { .. })
        ));
    }
}
