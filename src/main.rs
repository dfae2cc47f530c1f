//! Command-line entry point: answer one question over a text corpus.

use anyhow::Context;
use clap::Parser;
use ragpipe::artifacts::{ArtifactWriter, RunMetadata};
use ragpipe::generation::OllamaGenerationClient;
use ragpipe::pipeline::records::{AnswerRecord, CitationRecord};
use ragpipe::pipeline::{
    ChannelSink, EventKind, OutcomeKind, Pipeline, PipelineOutcome, PipelineSettings,
    ProgressEvent, RagQuery,
};
use ragpipe::{config, logging};
use std::path::PathBuf;
use time::OffsetDateTime;
use time::format_description::well_known::Rfc3339;

/// Answer a question from a plain-text file or directory using local models.
#[derive(Debug, Parser)]
#[command(name = "ragpipe", version, about)]
struct Cli {
    /// Question to answer.
    question: String,

    /// Input file or directory of .txt/.md documents.
    #[arg(short, long)]
    input: PathBuf,

    /// Directory where run artifacts are written.
    #[arg(short, long, default_value = "output")]
    output: PathBuf,

    /// Override the configured number of relevant chunks to collect.
    #[arg(long)]
    top_k: Option<usize>,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    config::init_config();
    logging::init_tracing();
    let config = config::get_config();

    let settings = PipelineSettings::from_config(config, cli.top_k);
    let client = OllamaGenerationClient::new(config.ollama_url.clone(), &config.tokenizer_model);
    let (sink, mut events) = ChannelSink::new();
    let drain = tokio::spawn(async move {
        while let Some(event) = events.recv().await {
            report_progress(&event);
        }
    });

    let pipeline = Pipeline::new(settings, Box::new(client), Box::new(sink))?;
    let query = RagQuery {
        question: cli.question.clone(),
        input_path: cli.input.clone(),
    };
    let result = pipeline.run(&query).await;

    // Dropping the pipeline drops the sink, which closes the event channel.
    drop(pipeline);
    drain.await.ok();

    let outcome = result?;
    persist(&cli, config, &outcome).context("failed to persist run artifacts")?;
    print_outcome(&outcome);
    Ok(())
}

fn report_progress(event: &ProgressEvent) {
    match event.kind {
        EventKind::Progress => {
            if let (Some(current), Some(total)) = (event.current, event.total) {
                eprintln!("[{}] {current}/{total} {}", event.stage, event.message);
            }
        }
        EventKind::Status => eprintln!("[{}] {}", event.stage, event.message),
        EventKind::Complete => eprintln!("[{}] {}", event.stage, event.message),
        EventKind::Error => eprintln!("[{}] error: {}", event.stage, event.message),
    }
}

fn persist(cli: &Cli, config: &config::Config, outcome: &PipelineOutcome) -> anyhow::Result<()> {
    let writer = ArtifactWriter::new(&cli.output);
    let timestamp = OffsetDateTime::now_utc()
        .format(&Rfc3339)
        .context("failed to format timestamp")?;

    writer.write_chunks(&outcome.chunks)?;
    writer.write_relevant_chunks(&outcome.relevant_chunks, &cli.question)?;
    if outcome.kind == OutcomeKind::Answered {
        writer.write_answer(&AnswerRecord {
            question: cli.question.clone(),
            input_path: cli.input.display().to_string(),
            answer: outcome.result.answer.clone(),
            citations: outcome
                .result
                .citations
                .iter()
                .map(CitationRecord::from)
                .collect(),
            timestamp: timestamp.clone(),
        })?;
    }
    writer.write_metadata(&RunMetadata {
        run_id: outcome.run_id.to_string(),
        created_at: timestamp,
        question: cli.question.clone(),
        input_path: cli.input.display().to_string(),
        split_mode: format!("{:?}", config.split_mode),
        chunk_size: config.chunk_size,
        chunk_overlap: config.chunk_overlap,
        min_chunk_size: config.min_chunk_size,
        total_chunks: outcome.chunks.len(),
        relevant_chunks: outcome.relevant_chunks.len(),
        citations: outcome.result.citations.len(),
        outcome: outcome_label(outcome.kind).to_string(),
    })?;
    tracing::info!(output = %cli.output.display(), "Run artifacts written");
    Ok(())
}

fn outcome_label(kind: OutcomeKind) -> &'static str {
    match kind {
        OutcomeKind::Answered => "answered",
        OutcomeKind::NoChunks => "no_chunks",
        OutcomeKind::NoRelevantChunks => "no_relevant_chunks",
    }
}

fn print_outcome(outcome: &PipelineOutcome) {
    match outcome.kind {
        OutcomeKind::Answered => {
            println!("{}", outcome.result.answer);
            if !outcome.result.citations.is_empty() {
                println!("\nSources:");
                for citation in &outcome.result.citations {
                    println!(
                        "  - \"{}\" ({}, {})",
                        citation.text, citation.source.file_name, citation.chunk_id
                    );
                }
            }
        }
        OutcomeKind::NoChunks => {
            println!("The input produced no text chunks; nothing to answer from.");
        }
        OutcomeKind::NoRelevantChunks => {
            println!("No chunk was judged relevant to the question.");
        }
    }
}
