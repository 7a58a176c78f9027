//! Declarative case table
//!
//! A [`Catalog`] is plain data: models, auxiliary artifacts, samples with
//! their variants, and cases referencing them by name. Fixture resolution
//! happens later in [`crate::fixtures`], so the table never holds resolved
//! paths.

use std::collections::{BTreeMap, HashSet};
use std::fs;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::case::{CheckKind, TestCase};
use crate::config::SamplesLayout;
use crate::error::{ParityError, Result};
use crate::variant::{ProgramVariant, SampleLanguage};

/// A model fixture, converted on demand from its hub id
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ModelSpec {
    pub name: String,
    pub hub_id: String,
    /// Pre-converted model directory; skips conversion when set
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub local_path: Option<PathBuf>,
}

/// An auxiliary file fetched over HTTP
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ArtifactSpec {
    pub name: String,
    pub url: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub sha256: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct VariantSpec {
    pub name: String,
    pub language: SampleLanguage,
    /// Relative to the samples directory of `language`
    pub program: PathBuf,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SampleSpec {
    pub name: String,
    pub variants: Vec<VariantSpec>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CaseSpec {
    /// Defaults to `<sample>/<model>`
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub id: Option<String>,
    pub sample: String,
    pub model: String,
    #[serde(default)]
    pub args: Vec<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub artifact: Option<String>,
    /// Subset of the sample's variants; all of them when absent
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub variants: Option<Vec<String>>,
    #[serde(default)]
    pub kind: CheckKind,
    #[serde(default)]
    pub tags: Vec<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub stdin: Option<String>,
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub env: BTreeMap<String, String>,
}

impl CaseSpec {
    pub fn id(&self) -> String {
        self.id.clone().unwrap_or_else(|| format!("{}/{}", self.sample, self.model))
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Catalog {
    #[serde(default)]
    pub models: Vec<ModelSpec>,
    #[serde(default)]
    pub artifacts: Vec<ArtifactSpec>,
    #[serde(default)]
    pub samples: Vec<SampleSpec>,
    #[serde(default)]
    pub cases: Vec<CaseSpec>,
}

const LORA_PROMPT: &str =
    "How to create a table with two columns, one of them has type float, another one has type int?";

impl Catalog {
    /// The shipped case table for the text-generation samples.
    pub fn builtin() -> Self {
        let model = |name: &str, hub_id: &str| ModelSpec {
            name: name.into(),
            hub_id: hub_id.into(),
            local_path: None,
        };
        let variant = |name: &str, language, program: &str| VariantSpec {
            name: name.into(),
            language,
            program: program.into(),
        };
        let case = |model: &str, args: &str, variants: Option<&[&str]>| CaseSpec {
            id: None,
            sample: "greedy_causal_lm".into(),
            model: model.into(),
            args: vec![args.into()],
            artifact: None,
            variants: variants.map(|v| v.iter().map(|s| s.to_string()).collect()),
            kind: CheckKind::Equivalence,
            tags: vec!["llm".into(), "samples".into()],
            stdin: None,
            env: BTreeMap::new(),
        };

        Self {
            models: vec![
                model("TinyLlama-1.1B-Chat-v1.0", "TinyLlama/TinyLlama-1.1B-Chat-v1.0"),
                model("SmolLM-135M", "HuggingFaceTB/SmolLM-135M"),
                model("Qwen2.5-0.5B-Instruct", "Qwen/Qwen2.5-0.5B-Instruct"),
                model("TinyStories-1M", "roneneldan/TinyStories-1M"),
            ],
            artifacts: vec![ArtifactSpec {
                name: "adapter_model.safetensors".into(),
                url: "https://huggingface.co/smangrul/tinyllama_lora_sql/resolve/main/adapter_model.safetensors"
                    .into(),
                sha256: None,
            }],
            samples: vec![
                SampleSpec {
                    name: "greedy_causal_lm".into(),
                    variants: vec![
                        variant(
                            "python",
                            SampleLanguage::Python,
                            "text_generation/greedy_causal_lm.py",
                        ),
                        variant("cpp", SampleLanguage::Cpp, "greedy_causal_lm"),
                        variant("c", SampleLanguage::C, "greedy_causal_lm_c"),
                    ],
                },
                SampleSpec {
                    name: "lora".into(),
                    variants: vec![variant(
                        "python",
                        SampleLanguage::Python,
                        "text_generation/lora.py",
                    )],
                },
            ],
            cases: vec![
                case("TinyLlama-1.1B-Chat-v1.0", "test", None),
                case("SmolLM-135M", "return 0", Some(&["python", "cpp"][..])),
                case("Qwen2.5-0.5B-Instruct", "69", None),
                CaseSpec {
                    sample: "lora".into(),
                    artifact: Some("adapter_model.safetensors".into()),
                    kind: CheckKind::Smoke,
                    ..case("TinyStories-1M", LORA_PROMPT, None)
                },
            ],
        }
    }

    pub fn from_toml(path: &Path) -> Result<Self> {
        let text = fs::read_to_string(path).map_err(|e| {
            ParityError::config(format!("cannot read case table {}: {e}", path.display()))
        })?;
        Self::from_toml_str(&text)
    }

    pub fn from_toml_str(text: &str) -> Result<Self> {
        Ok(toml::from_str(text)?)
    }

    pub fn to_toml(&self) -> Result<String> {
        Ok(toml::to_string_pretty(self)?)
    }

    pub fn model(&self, name: &str) -> Option<&ModelSpec> {
        self.models.iter().find(|m| m.name == name)
    }

    pub fn artifact(&self, name: &str) -> Option<&ArtifactSpec> {
        self.artifacts.iter().find(|a| a.name == name)
    }

    pub fn sample(&self, name: &str) -> Option<&SampleSpec> {
        self.samples.iter().find(|s| s.name == name)
    }

    /// Turn the table into validated [`TestCase`]s with program paths
    /// resolved against `layout`.
    ///
    /// Fails on the first case referencing an unknown name, declaring too
    /// few variants for its kind, or reusing an id.
    pub fn build_cases(&self, layout: &SamplesLayout) -> Result<Vec<TestCase>> {
        let mut seen = HashSet::new();
        let mut cases = Vec::with_capacity(self.cases.len());

        for spec in &self.cases {
            let id = spec.id();
            if !seen.insert(id.clone()) {
                return Err(ParityError::invalid_case(&id, "duplicate case id"));
            }
            let sample = self.sample(&spec.sample).ok_or_else(|| {
                ParityError::invalid_case(&id, format!("unknown sample '{}'", spec.sample))
            })?;
            if self.model(&spec.model).is_none() {
                return Err(ParityError::invalid_case(
                    &id,
                    format!("unknown model '{}'", spec.model),
                ));
            }
            if let Some(artifact) = &spec.artifact {
                if self.artifact(artifact).is_none() {
                    return Err(ParityError::invalid_case(
                        &id,
                        format!("unknown artifact '{artifact}'"),
                    ));
                }
            }

            let selected: Vec<&VariantSpec> = match &spec.variants {
                None => sample.variants.iter().collect(),
                Some(names) => names
                    .iter()
                    .map(|name| {
                        sample.variants.iter().find(|v| &v.name == name).ok_or_else(|| {
                            ParityError::invalid_case(
                                &id,
                                format!("sample '{}' has no variant '{name}'", sample.name),
                            )
                        })
                    })
                    .collect::<Result<_>>()?,
            };

            let case = TestCase {
                id,
                sample: spec.sample.clone(),
                model: spec.model.clone(),
                args: spec.args.clone(),
                artifact: spec.artifact.clone(),
                kind: spec.kind,
                variants: selected.into_iter().map(|v| resolve_variant(v, layout)).collect(),
                tags: spec.tags.clone(),
                stdin: spec.stdin.clone(),
                env: spec.env.iter().map(|(k, v)| (k.clone(), v.clone())).collect(),
            };
            case.validate()?;
            cases.push(case);
        }

        Ok(cases)
    }
}

fn resolve_variant(spec: &VariantSpec, layout: &SamplesLayout) -> ProgramVariant {
    match spec.language {
        SampleLanguage::Python => ProgramVariant::script(
            &spec.name,
            layout.python.clone(),
            layout.python_dir.join(&spec.program),
        ),
        SampleLanguage::Cpp => {
            ProgramVariant::native(&spec.name, spec.language, layout.cpp_dir.join(&spec.program))
        }
        SampleLanguage::C => {
            ProgramVariant::native(&spec.name, spec.language, layout.c_dir.join(&spec.program))
        }
    }
}
