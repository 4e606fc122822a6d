use anyhow::Result;
use skygen::detectors::DetectorTable;
use skygen::driver::{run_detectors, DetectorPlan};
use skygen::fits::FitsStore;
use skygen::selection::FrameKind;
use std::path::PathBuf;
use std::sync::Arc;

pub async fn generate_detector_skies(
    parent: PathBuf,
    chips: Option<Vec<u8>>,
    flat: bool,
    input_subdir: Option<String>,
    output_subdir: String,
) -> Result<()> {
    let table = DetectorTable::default();
    let kind = if flat { FrameKind::Flat } else { FrameKind::Registered };
    let detectors = chips.unwrap_or_else(|| table.detectors());

    let mut plan = DetectorPlan::new(&parent, detectors, kind);
    if let Some(subdir) = input_subdir {
        plan.input_subdir = subdir;
    }
    plan.output_subdir = output_subdir;

    println!(
        "Generating {} sky models under {} for detectors {:?}",
        kind.suffix(),
        parent.display(),
        plan.detectors
    );

    let outcomes = run_detectors(Arc::new(FitsStore), &plan, &table).await;

    println!();
    println!("{:<10} {:<8} {:<8} {:<10} {}", "Detector", "Frames", "Groups", "Missing%", "Result");
    println!("{:-<90}", "");

    let mut failed = Vec::new();
    for outcome in &outcomes {
        match &outcome.result {
            Ok(run) => println!(
                "{:<10} {:<8} {:<8} {:<10.2} {}",
                format!("C{}", outcome.detector),
                run.frame_count,
                run.group_count,
                run.repair.missing_percent,
                run.output_path.display()
            ),
            Err(e) => {
                println!("{:<10} {:<8} {:<8} {:<10} FAILED: {}", format!("C{}", outcome.detector), "-", "-", "-", e);
                failed.push(outcome.detector);
            }
        }
    }

    if !failed.is_empty() {
        anyhow::bail!(
            "Sky generation failed under {} for detectors {:?}",
            parent.display(),
            failed
        );
    }
    Ok(())
}
