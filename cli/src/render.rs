//! Renderer that keeps a copy of every artifact on disk.

use std::fs;
use std::path::{Path, PathBuf};
use ticketing_core::{DeliveryError, PayloadRenderer, Renderer, TicketArtifact, TicketFace};
use tracing::debug;

/// Wraps another renderer and writes each artifact into `output_dir`.
#[derive(Debug, Clone)]
pub(crate) struct DirectoryRenderer<R = PayloadRenderer> {
    inner: R,
    output_dir: PathBuf,
}

impl DirectoryRenderer {
    /// Payload renderer writing into `output_dir`.
    pub(crate) fn new(output_dir: impl Into<PathBuf>) -> Self {
        Self::wrap(PayloadRenderer::new(), output_dir)
    }
}

impl<R> DirectoryRenderer<R> {
    pub(crate) fn wrap(inner: R, output_dir: impl Into<PathBuf>) -> Self {
        Self {
            inner,
            output_dir: output_dir.into(),
        }
    }

    pub(crate) fn output_dir(&self) -> &Path {
        &self.output_dir
    }
}

impl<R: Renderer> Renderer for DirectoryRenderer<R> {
    fn render(&self, face: &TicketFace) -> Result<TicketArtifact, DeliveryError> {
        let artifact = self.inner.render(face)?;

        // File names come from ticket numbers; refuse anything that would leave the directory.
        let name = Path::new(&artifact.file_name);
        if name.components().count() != 1 || name.file_name().is_none() {
            return Err(DeliveryError::Render(format!(
                "refusing to write artifact named {:?}",
                artifact.file_name
            )));
        }

        fs::create_dir_all(&self.output_dir).map_err(|e| {
            DeliveryError::Render(format!("create {}: {e}", self.output_dir.display()))
        })?;
        let path = self.output_dir.join(name);
        fs::write(&path, &artifact.bytes)
            .map_err(|e| DeliveryError::Render(format!("write {}: {e}", path.display())))?;

        debug!(ticket_no = %artifact.ticket_no, path = %path.display(), "Artifact written");
        Ok(artifact)
    }
}

#[cfg(test)]
#[allow(clippy::expect_used)]
mod tests {
    use super::*;
    use ticketing_core::TicketNo;

    fn face() -> TicketFace {
        TicketFace {
            ticket_no: TicketNo::new("CYP007"),
            signature_text: "c2lnbmF0dXJl".to_string(),
            name: "Grace".to_string(),
        }
    }

    struct Named(&'static str);

    impl Renderer for Named {
        fn render(&self, face: &TicketFace) -> Result<TicketArtifact, DeliveryError> {
            Ok(TicketArtifact {
                ticket_no: face.ticket_no.clone(),
                file_name: self.0.to_string(),
                media_type: "text/plain".to_string(),
                bytes: b"x".to_vec(),
            })
        }
    }

    #[test]
    fn writes_artifact_into_nested_directory() {
        let dir = tempfile::tempdir().expect("tempdir");
        let out = dir.path().join("out").join("tickets");
        let renderer = DirectoryRenderer::new(&out);

        let artifact = renderer.render(&face()).expect("render");

        assert_eq!(renderer.output_dir(), out.as_path());
        let written = fs::read(out.join("CYP007.txt")).expect("artifact on disk");
        assert_eq!(written, artifact.bytes);
        let text = String::from_utf8(written).expect("utf8");
        assert!(text.contains("CYP007,c2lnbmF0dXJl"));
    }

    #[test]
    fn rejects_names_outside_the_directory() {
        let dir = tempfile::tempdir().expect("tempdir");
        for name in ["../escape.txt", "nested/file.txt", ".."] {
            let renderer = DirectoryRenderer::wrap(Named(name), dir.path());
            assert!(matches!(
                renderer.render(&face()),
                Err(DeliveryError::Render(_))
            ));
        }
        assert!(!dir.path().parent().expect("parent").join("escape.txt").exists());
    }

    #[test]
    fn inner_failure_writes_nothing() {
        struct Broken;
        impl Renderer for Broken {
            fn render(&self, _: &TicketFace) -> Result<TicketArtifact, DeliveryError> {
                Err(DeliveryError::Render("no ink".to_string()))
            }
        }

        let dir = tempfile::tempdir().expect("tempdir");
        let out = dir.path().join("tickets");
        let renderer = DirectoryRenderer::wrap(Broken, &out);
        assert!(renderer.render(&face()).is_err());
        assert!(!out.exists());
    }
}
