use std::path::Path;

use anyhow::{bail, Context};
use rhai::{Engine, Scope, AST};
use tracing::warn;

use super::score::RfmScores;
use super::segment::{Segmenter, OTHERS};

/// Segment rules loaded from a Rhai script file.
///
/// Scripts must define `segment(r, f, m)` returning the segment name. The
/// three arguments are the integer scores 1..=5. A runtime error in the
/// script yields `Others` and is logged.
pub struct RhaiSegmenter {
    engine: Engine,
    ast: AST,
    name: String,
}

impl std::fmt::Debug for RhaiSegmenter {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RhaiSegmenter")
            .field("name", &self.name)
            .finish()
    }
}

impl RhaiSegmenter {
    /// Load segment rules from a `.rhai` file.
    pub fn from_file(path: &Path) -> anyhow::Result<Self> {
        let source = std::fs::read_to_string(path)
            .with_context(|| format!("failed to read script: {}", path.display()))?;

        let name = path
            .file_stem()
            .map(|s| s.to_string_lossy().into_owned())
            .unwrap_or_else(|| "unknown".to_string());

        Self::from_source(&name, &source)
            .with_context(|| format!("failed to load script: {}", path.display()))
    }

    /// Load segment rules from source code (useful for testing).
    pub fn from_source(name: &str, source: &str) -> anyhow::Result<Self> {
        let mut engine = Engine::new();
        engine.set_optimization_level(rhai::OptimizationLevel::Full);

        let ast = engine
            .compile(source)
            .map_err(|e| anyhow::anyhow!("compile error: {}", e))?;

        let has_segment = ast
            .iter_functions()
            .any(|f| f.name == "segment" && f.params.len() == 3);
        if !has_segment {
            bail!("script must define a `segment(r, f, m)` function");
        }

        Ok(Self {
            engine,
            ast,
            name: name.to_string(),
        })
    }
}

impl Segmenter for RhaiSegmenter {
    fn name(&self) -> &str {
        &self.name
    }

    fn segment(&self, scores: &RfmScores) -> String {
        let mut scope = Scope::new();
        let args = (
            scores.recency as i64,
            scores.frequency as i64,
            scores.monetary as i64,
        );
        match self
            .engine
            .call_fn::<String>(&mut scope, &self.ast, "segment", args)
        {
            Ok(segment) if !segment.trim().is_empty() => segment,
            Ok(_) => {
                warn!(script = %self.name, code = %scores.code(), "segment() returned an empty name");
                OTHERS.to_string()
            }
            Err(e) => {
                warn!(script = %self.name, code = %scores.code(), "segment() error: {}", e);
                OTHERS.to_string()
            }
        }
    }
}
