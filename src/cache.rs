//! Image cache policy.
//!
//! Classifies images into the tiers this system builds and decides, per
//! configured cache level, what survives a run. Images that pre-existed the
//! run are protected unless `clean` is set; images with foreign names are
//! never touched.
use crate::docker::ContainerRuntime;
use clap::ValueEnum;
use std::collections::BTreeSet;
use tracing::{debug, warn};

/// Name prefix of the shared environment tier.
pub const ENV_IMAGE_PREFIX: &str = "patchval.env.";
/// Name prefix of the per-task instance tier.
pub const INSTANCE_IMAGE_PREFIX: &str = "patchval.eval.";

/// Which image tiers survive across and within runs. Levels are ordered:
/// each level preserves its own tier and everything below it. `Instance`
/// preserves every tier this system builds.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, ValueEnum)]
pub enum CacheLevel {
    /// Keep nothing the run created.
    None,
    /// Keep shared environment images only.
    Env,
    /// Keep environment and per-task instance images.
    Instance,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
enum ImageTier {
    Env,
    Instance,
    Foreign,
}

fn classify(image: &str) -> ImageTier {
    if image.starts_with(ENV_IMAGE_PREFIX) {
        ImageTier::Env
    } else if image.starts_with(INSTANCE_IMAGE_PREFIX) {
        ImageTier::Instance
    } else {
        ImageTier::Foreign
    }
}

/// Whether one image should be evicted after a run.
///
/// `existed_before` marks images present in the pre-run snapshot; those are
/// only eligible when `clean` is set, regardless of level.
pub fn should_remove(
    image: &str,
    cache_level: CacheLevel,
    clean: bool,
    existed_before: bool,
) -> bool {
    let retained = match classify(image) {
        ImageTier::Foreign => return false,
        ImageTier::Env => cache_level >= CacheLevel::Env,
        ImageTier::Instance => cache_level >= CacheLevel::Instance,
    };
    if retained {
        return false;
    }
    clean || !existed_before
}

/// Evict images per policy. Runs exactly once per run, after all task
/// executions and before report synthesis. Individual removal failures are
/// logged and skipped; they never escalate. Returns the number removed.
pub fn clean_images(
    runtime: &dyn ContainerRuntime,
    existing: &BTreeSet<String>,
    cache_level: CacheLevel,
    clean: bool,
) -> usize {
    let current = match runtime.list_images() {
        Ok(current) => current,
        Err(err) => {
            warn!("could not enumerate images for cleanup, skipping: {err:#}");
            return 0;
        }
    };

    let mut removed = 0;
    for image in &current {
        let existed_before = existing.contains(image);
        if !should_remove(image, cache_level, clean, existed_before) {
            continue;
        }
        match runtime.remove_image(image) {
            Ok(()) => {
                debug!(image = %image, "removed image");
                removed += 1;
            }
            Err(err) => warn!(image = %image, "failed to remove image, skipping: {err:#}"),
        }
    }
    removed
}

#[cfg(test)]
mod tests {
    use super::*;
    use anyhow::Result;
    use std::cell::RefCell;

    struct FakeRuntime {
        images: BTreeSet<String>,
        removed: RefCell<Vec<String>>,
    }

    impl FakeRuntime {
        fn with_images(images: &[&str]) -> Self {
            Self {
                images: images.iter().map(|image| (*image).to_string()).collect(),
                removed: RefCell::new(Vec::new()),
            }
        }
    }

    impl ContainerRuntime for FakeRuntime {
        fn list_images(&self) -> Result<BTreeSet<String>> {
            Ok(self.images.clone())
        }

        fn remove_image(&self, image: &str) -> Result<()> {
            self.removed.borrow_mut().push(image.to_string());
            Ok(())
        }
    }

    fn snapshot(images: &[&str]) -> BTreeSet<String> {
        images.iter().map(|image| (*image).to_string()).collect()
    }

    #[test]
    fn never_removes_snapshot_images_without_clean() {
        for level in [CacheLevel::None, CacheLevel::Env, CacheLevel::Instance] {
            assert!(!should_remove("patchval.env.x86_64.abc:latest", level, false, true));
            assert!(!should_remove("patchval.eval.x86_64.task:latest", level, false, true));
        }
    }

    #[test]
    fn clean_makes_snapshot_images_eligible_by_tier() {
        assert!(should_remove(
            "patchval.env.x86_64.abc:latest",
            CacheLevel::None,
            true,
            true
        ));
        assert!(!should_remove(
            "patchval.env.x86_64.abc:latest",
            CacheLevel::Env,
            true,
            true
        ));
    }

    #[test]
    fn none_removes_everything_the_run_created() {
        let runtime = FakeRuntime::with_images(&[
            "patchval.env.x86_64.abc:latest",
            "patchval.eval.x86_64.task:latest",
        ]);
        let removed = clean_images(&runtime, &BTreeSet::new(), CacheLevel::None, false);
        assert_eq!(removed, 2);
    }

    #[test]
    fn env_level_keeps_env_and_drops_instance() {
        let runtime = FakeRuntime::with_images(&[
            "patchval.env.x86_64.abc:latest",
            "patchval.eval.x86_64.task:latest",
        ]);
        clean_images(&runtime, &BTreeSet::new(), CacheLevel::Env, false);
        assert_eq!(
            runtime.removed.borrow().as_slice(),
            ["patchval.eval.x86_64.task:latest"]
        );
    }

    #[test]
    fn instance_level_keeps_all_created_images() {
        let runtime = FakeRuntime::with_images(&[
            "patchval.env.x86_64.abc:latest",
            "patchval.eval.x86_64.task:latest",
        ]);
        let removed = clean_images(&runtime, &BTreeSet::new(), CacheLevel::Instance, false);
        assert_eq!(removed, 0);
    }

    #[test]
    fn foreign_images_are_never_touched() {
        let runtime = FakeRuntime::with_images(&["ubuntu:22.04", "python:3.11-bookworm"]);
        let removed = clean_images(&runtime, &BTreeSet::new(), CacheLevel::None, true);
        assert_eq!(removed, 0);
    }

    #[test]
    fn snapshot_images_survive_none_level_without_clean() {
        let images = [
            "patchval.env.x86_64.abc:latest",
            "patchval.eval.x86_64.task:latest",
        ];
        let runtime = FakeRuntime::with_images(&images);
        clean_images(&runtime, &snapshot(&images), CacheLevel::None, false);
        assert!(runtime.removed.borrow().is_empty());
    }
}
