use std::fs;
use std::io::Write;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use jobharvest_core::Job;
use tracing::info;

/// Output format requested by the Orchestrator for a run (§4.13).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OutputFormat {
    Json,
    Csv,
    Text,
}

impl OutputFormat {
    pub fn parse(name: &str) -> Option<Self> {
        match name {
            "json" => Some(Self::Json),
            "csv" => Some(Self::Csv),
            "text" => Some(Self::Text),
            _ => None,
        }
    }

    fn extension(self) -> &'static str {
        match self {
            OutputFormat::Json => "json",
            OutputFormat::Csv => "csv",
            OutputFormat::Text => "txt",
        }
    }
}

/// Writes a batch of [`Job`]s to one or more formats, each to a
/// timestamp-slugged file under `dir`, via temp-file-then-atomic-rename
/// (§4.13).
pub struct OutputWriter {
    dir: PathBuf,
}

impl OutputWriter {
    pub fn new(dir: impl Into<PathBuf>) -> std::io::Result<Self> {
        let dir = dir.into();
        fs::create_dir_all(&dir)?;
        Ok(Self { dir })
    }

    /// Writes `jobs` in every requested format and returns the paths
    /// written, one per format, in the order given.
    pub fn write_all(&self, jobs: &[Job], formats: &[OutputFormat], now: DateTime<Utc>) -> Result<Vec<PathBuf>> {
        let slug = now.format("%Y%m%dT%H%M%SZ");
        let mut written = Vec::with_capacity(formats.len());
        for format in formats {
            let path = self
                .dir
                .join(format!("jobs-{slug}.{}", format.extension()));
            self.write_one(jobs, *format, &path)?;
            info!(path = %path.display(), jobs = jobs.len(), "output written");
            written.push(path);
        }
        Ok(written)
    }

    fn write_one(&self, jobs: &[Job], format: OutputFormat, path: &Path) -> Result<()> {
        let tmp_path = path.with_extension(format!("{}.tmp", format.extension()));
        let body = match format {
            OutputFormat::Json => render_json(jobs)?,
            OutputFormat::Csv => render_csv(jobs)?,
            OutputFormat::Text => render_text(jobs).into(),
        };
        fs::write(&tmp_path, body).with_context(|| format!("writing {}", tmp_path.display()))?;
        fs::rename(&tmp_path, path).with_context(|| format!("renaming into {}", path.display()))?;
        Ok(())
    }
}

fn render_json(jobs: &[Job]) -> Result<Vec<u8>> {
    Ok(serde_json::to_vec_pretty(jobs)?)
}

const CSV_HEADER: &[&str] = &[
    "url",
    "title",
    "company",
    "location",
    "work_mode",
    "level",
    "salary_min",
    "salary_max",
    "description",
    "technologies",
    "benefits",
    "posted_at",
    "collected_at",
    "source_fingerprint",
];

fn render_csv(jobs: &[Job]) -> Result<Vec<u8>> {
    let mut writer = csv::WriterBuilder::new().from_writer(Vec::new());
    writer.write_record(CSV_HEADER)?;
    for job in jobs {
        writer.write_record(&[
            job.url.as_str(),
            job.title.as_str(),
            job.company.as_str(),
            job.location.as_str(),
            &format!("{:?}", job.work_mode).to_lowercase(),
            &format!("{:?}", job.level).to_lowercase(),
            &job.salary_min.map(|v| v.to_string()).unwrap_or_default(),
            &job.salary_max.map(|v| v.to_string()).unwrap_or_default(),
            job.description.as_str(),
            &job.technologies.join(";"),
            &job.benefits.join(";"),
            &job.posted_at.map(|v| v.to_rfc3339()).unwrap_or_default(),
            &job.collected_at.to_rfc3339(),
            job.source_fingerprint.as_str(),
        ])?;
    }
    Ok(writer.into_inner()?)
}

fn render_text(jobs: &[Job]) -> String {
    let mut out = String::new();
    for (idx, job) in jobs.iter().enumerate() {
        if idx > 0 {
            out.push_str(&"-".repeat(40));
            out.push('\n');
        }
        out.push_str(&format!("url: {}\n", job.url));
        out.push_str(&format!("title: {}\n", job.title));
        out.push_str(&format!("company: {}\n", job.company));
        out.push_str(&format!("location: {}\n", job.location));
        out.push_str(&format!("work_mode: {:?}\n", job.work_mode));
        out.push_str(&format!("level: {:?}\n", job.level));
        out.push_str(&format!(
            "salary_min: {}\n",
            job.salary_min.map(|v| v.to_string()).unwrap_or_default()
        ));
        out.push_str(&format!(
            "salary_max: {}\n",
            job.salary_max.map(|v| v.to_string()).unwrap_or_default()
        ));
        out.push_str(&format!("description: {}\n", job.description));
        out.push_str(&format!("technologies: {}\n", job.technologies.join(";")));
        out.push_str(&format!("benefits: {}\n", job.benefits.join(";")));
        out.push_str(&format!(
            "posted_at: {}\n",
            job.posted_at.map(|v| v.to_rfc3339()).unwrap_or_default()
        ));
        out.push_str(&format!("collected_at: {}\n", job.collected_at.to_rfc3339()));
        out.push_str(&format!("source_fingerprint: {}\n", job.source_fingerprint));
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use jobharvest_core::{Level, WorkMode};

    fn sample_job() -> Job {
        Job {
            url: "https://jobs.example.com/1".to_string(),
            title: "Senior Engineer".to_string(),
            company: "Acme, Inc.".to_string(),
            location: "Berlin".to_string(),
            work_mode: WorkMode::Remote,
            level: Level::Senior,
            salary_min: Some(80_000),
            salary_max: Some(100_000),
            description: "Build things.\nShip them.".to_string(),
            technologies: vec!["rust".to_string(), "postgres".to_string()],
            benefits: vec!["health".to_string()],
            posted_at: None,
            collected_at: Utc::now(),
            source_fingerprint: "fp1".to_string(),
            anomalies: vec![],
        }
    }

    #[test]
    fn writes_json_csv_and_text_with_timestamped_names() {
        let dir = tempfile::tempdir().unwrap();
        let writer = OutputWriter::new(dir.path()).unwrap();
        let now = Utc::now();
        let jobs = vec![sample_job()];

        let paths = writer
            .write_all(&jobs, &[OutputFormat::Json, OutputFormat::Csv, OutputFormat::Text], now)
            .unwrap();

        assert_eq!(paths.len(), 3);
        for path in &paths {
            assert!(path.exists());
        }
    }

    #[test]
    fn csv_escapes_embedded_commas_and_newlines() {
        let dir = tempfile::tempdir().unwrap();
        let writer = OutputWriter::new(dir.path()).unwrap();
        let jobs = vec![sample_job()];
        let now = Utc::now();

        let paths = writer.write_all(&jobs, &[OutputFormat::Csv], now).unwrap();
        let content = fs::read_to_string(&paths[0]).unwrap();

        let mut reader = csv::Reader::from_reader(content.as_bytes());
        let record = reader.records().next().unwrap().unwrap();
        assert_eq!(record.get(2), Some("Acme, Inc."));
        assert_eq!(record.get(8), Some("Build things.\nShip them."));
        assert_eq!(record.get(9), Some("rust;postgres"));
    }

    #[test]
    fn text_blocks_are_separated_by_dash_lines() {
        let dir = tempfile::tempdir().unwrap();
        let writer = OutputWriter::new(dir.path()).unwrap();
        let jobs = vec![sample_job(), sample_job()];
        let now = Utc::now();

        let paths = writer.write_all(&jobs, &[OutputFormat::Text], now).unwrap();
        let content = fs::read_to_string(&paths[0]).unwrap();
        assert_eq!(content.matches(&"-".repeat(40)).count(), 1);
    }
}
