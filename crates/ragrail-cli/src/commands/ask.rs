//! Ask command

use crate::app::{AskArgs, OutputFormat};
use crate::pipeline::{self, PipelineOptions};
use anyhow::Result;
use ragrail_core::guardrail::GuardrailMetrics;
use ragrail_core::{ChatResult, Config, StreamingHandler};
use std::io::{self, Write};

/// Echoes streamed tokens to stdout
struct StdoutHandler {
    echo: bool,
}

impl StreamingHandler for StdoutHandler {
    fn on_partial(&mut self, token: &str) {
        if self.echo {
            print!("{}", token);
            io::stdout().flush().ok();
        }
    }

    fn on_complete(&mut self, _result: &ChatResult) {
        if self.echo {
            println!();
        }
    }
}

pub async fn run(args: AskArgs, config: &Config, format: OutputFormat, verbose: bool) -> Result<()> {
    let question = args.question.join(" ");
    let options = PipelineOptions {
        model: args.model,
        use_rag: !args.no_rag,
        system_prompt: args.system,
    };
    let pipeline = pipeline::build(config, &options).await?;

    let result = if args.stream {
        let mut handler = StdoutHandler {
            echo: format == OutputFormat::Cli,
        };
        pipeline
            .service
            .chat_stream(&args.memory_id, &question, &mut handler)
            .await?
    } else {
        pipeline.service.chat(&args.memory_id, &question).await?
    };

    match format {
        OutputFormat::Json => {
            println!("{}", serde_json::to_string_pretty(&to_json(&result))?);
        }
        OutputFormat::Cli => {
            if !args.stream {
                println!("{}", result.text);
            }
            print_details(&result);
        }
    }

    if verbose {
        print_metrics(&pipeline.metrics);
    }
    Ok(())
}

fn source_name(content: &ragrail_core::Content) -> &str {
    content
        .segment
        .metadata
        .get("file_name")
        .map(String::as_str)
        .unwrap_or("-")
}

fn to_json(result: &ChatResult) -> serde_json::Value {
    let sources: Vec<serde_json::Value> = result
        .sources
        .iter()
        .map(|c| {
            serde_json::json!({
                "file": source_name(c),
                "score": c.score,
                "text": c.text(),
            })
        })
        .collect();

    serde_json::json!({
        "text": result.text,
        "sources": sources,
        "token_usage": result.token_usage,
        "cost": result.cost.as_ref().map(|c| c.to_string()),
    })
}

fn print_details(result: &ChatResult) {
    if !result.sources.is_empty() {
        println!();
        println!("Sources:");
        for content in &result.sources {
            match content.score {
                Some(score) => println!("  {:>3}% {}", (score * 100.0) as u32, source_name(content)),
                None => println!("       {}", source_name(content)),
            }
        }
    }

    if let Some(usage) = result.token_usage {
        eprintln!(
            "Tokens: {} in, {} out ({} total)",
            usage.input_tokens,
            usage.output_tokens,
            usage.total()
        );
    }
    if let Some(cost) = &result.cost {
        eprintln!("Cost:   {}", cost);
    }
}

fn print_metrics(metrics: &GuardrailMetrics) {
    for sample in metrics.snapshot() {
        if !sample.name.ends_with(".timed") {
            continue;
        }
        eprintln!(
            "{} {} [{}] count={} p95={:?}",
            sample.name,
            sample.tags.get("guardrail").map(String::as_str).unwrap_or("-"),
            sample.tags.get("outcome").map(String::as_str).unwrap_or("-"),
            sample.count,
            sample.p95
        );
    }
}
