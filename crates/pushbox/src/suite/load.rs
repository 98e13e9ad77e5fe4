use crate::classify::validate_pattern;
use crate::error::{ErrorCode, HarnessError, HarnessResult};
use crate::model::{ImageSpec, ScenarioTarget, SuiteConfig, SUITE_VERSION};
use crate::sandbox::health::MAX_HEALTH_INTERVAL;
use std::collections::BTreeSet;
use std::fs;
use std::path::Path;

/// Minimum trust verification attempts a suite may configure.
pub const MIN_VERIFY_ATTEMPTS: u32 = 3;
/// Minimum delay between trust verification attempts.
pub const MIN_VERIFY_DELAY_MS: u64 = 1_000;

/// Load a suite from YAML (`.yaml`/`.yml`) or JSON.
///
/// A relative `work_dir` is resolved against the suite file's directory.
pub fn load_suite_file(path: &Path) -> HarnessResult<SuiteConfig> {
    let data = fs::read_to_string(path).map_err(|err| {
        HarnessError::io(
            ErrorCode::Io,
            format!("failed to read suite file {}", path.display()),
            err,
        )
    })?;
    let is_yaml = path
        .extension()
        .and_then(|ext| ext.to_str())
        .is_some_and(|ext| ext == "yaml" || ext == "yml");
    let mut config: SuiteConfig = if is_yaml {
        serde_yml::from_str(&data).map_err(|err| {
            HarnessError::with_context(
                ErrorCode::Config,
                "failed to parse yaml suite",
                serde_json::json!({ "path": path.display().to_string(), "source": err.to_string() }),
            )
        })?
    } else {
        serde_json::from_str(&data).map_err(|err| {
            HarnessError::with_context(
                ErrorCode::Config,
                "failed to parse json suite",
                serde_json::json!({ "path": path.display().to_string(), "source": err.to_string() }),
            )
        })?
    };
    if config.work_dir.is_relative() {
        let base = path.parent().unwrap_or_else(|| Path::new("."));
        config.work_dir = base.join(&config.work_dir);
    }
    Ok(config)
}

/// Check everything that would otherwise fail mid-run.
pub fn validate_suite(config: &SuiteConfig) -> HarnessResult<()> {
    if config.suite_version != SUITE_VERSION {
        return Err(HarnessError::config(format!(
            "unsupported suite_version {} (expected {SUITE_VERSION})",
            config.suite_version
        )));
    }
    if config.runtime.port == 0 {
        return Err(HarnessError::config("runtime.port must be non-zero"));
    }
    if config.runtime.name_prefix.is_empty() {
        return Err(HarnessError::config("runtime.name_prefix must not be empty"));
    }
    let interval = config.health.interval();
    if interval.is_zero() || interval > MAX_HEALTH_INTERVAL {
        return Err(HarnessError::config(format!(
            "health.interval_ms must be between 1 and {}",
            MAX_HEALTH_INTERVAL.as_millis()
        )));
    }
    if config.trust.verify.max_attempts < MIN_VERIFY_ATTEMPTS {
        return Err(HarnessError::config(format!(
            "trust.verify.max_attempts must be at least {MIN_VERIFY_ATTEMPTS}"
        )));
    }
    if config.trust.verify.delay_ms < MIN_VERIFY_DELAY_MS {
        return Err(HarnessError::config(format!(
            "trust.verify.delay_ms must be at least {MIN_VERIFY_DELAY_MS}"
        )));
    }

    let mut artifact_names = BTreeSet::new();
    for step in &config.artifacts {
        if !artifact_names.insert(step.name.as_str()) {
            return Err(HarnessError::config(format!(
                "duplicate artifact name '{}'",
                step.name
            )));
        }
        if (step.skip_if_exists || step.executable) && step.output.is_none() {
            return Err(HarnessError::config(format!(
                "artifact '{}' needs an output for skip_if_exists/executable",
                step.name
            )));
        }
    }

    // Also rejects duplicate tags, unknown dependencies and cycles.
    image_waves(&config.images)?;
    let tags: BTreeSet<&str> = config.images.iter().map(|i| i.tag.as_str()).collect();

    let mut names = BTreeSet::new();
    for scenario in &config.scenarios {
        if !names.insert(scenario.name.as_str()) {
            return Err(HarnessError::config(format!(
                "duplicate scenario name '{}'",
                scenario.name
            )));
        }
        if scenario.timeout_ms == 0 {
            return Err(HarnessError::config(format!(
                "scenario '{}' has a zero timeout",
                scenario.name
            )));
        }
        if let ScenarioTarget::Sandbox { image, sandbox } = &scenario.target {
            if !tags.is_empty() && !tags.contains(image.as_str()) {
                return Err(HarnessError::config(format!(
                    "scenario '{}' uses unknown image '{image}'",
                    scenario.name
                )));
            }
            if !sandbox.starts_with(&config.runtime.name_prefix) {
                return Err(HarnessError::config(format!(
                    "sandbox '{sandbox}' does not start with '{}'",
                    config.runtime.name_prefix
                )));
            }
        }
        validate_pattern(&scenario.expect).map_err(|err| {
            HarnessError::with_context(
                err.code,
                format!("scenario '{}': {}", scenario.name, err.message),
                err.context,
            )
        })?;
    }
    Ok(())
}

/// Group images into build waves: every image's dependencies are in an
/// earlier wave. Order within a wave follows declaration order.
pub fn image_waves(images: &[ImageSpec]) -> HarnessResult<Vec<Vec<ImageSpec>>> {
    let mut known: BTreeSet<&str> = BTreeSet::new();
    for image in images {
        if !known.insert(image.tag.as_str()) {
            return Err(HarnessError::config(format!(
                "duplicate image tag '{}'",
                image.tag
            )));
        }
    }
    for image in images {
        if let Some(missing) = image
            .depends_on
            .iter()
            .find(|dep| !known.contains(dep.as_str()))
        {
            return Err(HarnessError::config(format!(
                "image '{}' depends on unknown image '{missing}'",
                image.tag
            )));
        }
    }

    let mut built: BTreeSet<&str> = BTreeSet::new();
    let mut waves = Vec::new();
    while built.len() < images.len() {
        let wave: Vec<&ImageSpec> = images
            .iter()
            .filter(|image| !built.contains(image.tag.as_str()))
            .filter(|image| image.depends_on.iter().all(|d| built.contains(d.as_str())))
            .collect();
        if wave.is_empty() {
            let stuck: Vec<&str> = images
                .iter()
                .map(|i| i.tag.as_str())
                .filter(|tag| !built.contains(tag))
                .collect();
            return Err(HarnessError::with_context(
                ErrorCode::Config,
                "image dependencies form a cycle",
                serde_json::json!({ "images": stuck }),
            ));
        }
        built.extend(wave.iter().map(|image| image.tag.as_str()));
        waves.push(wave.into_iter().cloned().collect());
    }
    Ok(waves)
}
