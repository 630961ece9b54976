use std::path::{Path, PathBuf};
use std::time::Duration;

use asar_core::extract::ExtractEvent;
use indicatif::{ProgressBar, ProgressStyle};

use crate::{ExtractCommand, OpenArgs};

fn output_path(output: &Option<PathBuf>, input: &Path) -> PathBuf {
    if let Some(output) = output {
        // specified output directory
        output.clone()
    } else if let Some(parent) = input.parent() {
        // next to the archive, named after it
        let dir_name = input
            .file_stem()
            .map(|s| s.to_string_lossy().to_string())
            .unwrap_or("output".to_string());
        parent.join(dir_name)
    } else {
        // current directory
        ".".into()
    }
}

pub fn extract(cmd: &ExtractCommand, open: &OpenArgs) -> anyhow::Result<()> {
    let archive = open.open(&cmd.input)?;
    let output_path = output_path(&cmd.output, &cmd.input);

    let bar = ProgressBar::new(0);
    bar.set_style(
        ProgressStyle::default_bar().template("{pos}/{len} files written {wide_bar} elapsed: {elapsed} eta: {eta}")?,
    );
    bar.enable_steady_tick(Duration::from_millis(100));
    bar.println(format!("Output directory: `{}`", output_path.display()));

    let bar1 = bar.clone();
    let mut extractor = archive
        .extractor(&output_path)
        .parallel(!cmd.sequential)
        .overwrite(cmd.r#override)
        .continue_on_error(cmd.ignore_error)
        .on_event(move |event| match event {
            ExtractEvent::Start { total } => bar1.set_length(total as u64),
            ExtractEvent::FileDone { path, error } => {
                if let Some(error) = error {
                    bar1.println(format!("Error extracting `{path}`: {error}"));
                }
                bar1.inc(1);
            }
            _ => {}
        });
    if let Some(threads) = cmd.threads {
        extractor = extractor.threads(threads);
    }

    let report = extractor.run();
    bar.finish();
    let report = report?;

    if report.failed > 0 {
        println!("Done with {} errors", report.failed);
    } else {
        println!("Done. {} entries extracted.", report.extracted);
    }
    Ok(())
}
