//! # fntrace - Main Entry Point
//!
//! Offline side of function tracing:
//! - **Image inspection** (`info`, `functions`, `resolve`, `demangle`)
//! - **Recording decode** (`decode`): framed sink records plus the saved
//!   function table become a Chrome trace

use anyhow::{Context, Result};
use clap::Parser;
use log::info;
use std::fs::File;
use std::io::{BufReader, BufWriter, Write};

use fntrace::capture::FunctionTable;
use fntrace::cli::{Args, Command};
use fntrace::export::ChromeTraceExporter;
use fntrace::symbolization::{demangle, ModuleLayout, SourceLocation, Symbolizer};
use fntrace::trace_data::TraceData;

// Exit codes
const EXIT_SUCCESS: i32 = 0;
const EXIT_ERROR: i32 = 1;
const EXIT_USAGE: i32 = 2;

fn main() {
    env_logger::init();

    let args = match Args::try_parse() {
        Ok(args) => args,
        Err(e) => {
            let _ = e.print();
            std::process::exit(if e.use_stderr() { EXIT_USAGE } else { EXIT_SUCCESS });
        }
    };

    std::process::exit(match run(args) {
        Ok(()) => EXIT_SUCCESS,
        Err(e) => {
            eprintln!("error: {e:#}");
            EXIT_ERROR
        }
    });
}

fn run(args: Args) -> Result<()> {
    match args.command {
        Command::Info { image, json } => {
            let symbolizer = Symbolizer::open(&image)?;
            let info = symbolizer.info();
            if json {
                println!("{}", serde_json::to_string_pretty(&info)?);
            } else {
                println!("architecture: {}", info.architecture);
                println!("build id:     {}", if info.build_id.is_empty() { "<none>" } else { info.build_id.as_str() });
                match info.load_bias {
                    Some(bias) => println!("load bias:    {bias:#x}"),
                    None => println!("load bias:    <none>"),
                }
            }
        }

        Command::Functions { image, with_source, json, table, build_id } => {
            let symbolizer = Symbolizer::open(&image)?;
            if let Some(expected) = &build_id {
                symbolizer.verify_build_id(expected)?;
            }
            if let Some(table_path) = table {
                let functions = symbolizer.function_table()?;
                let mut writer = BufWriter::new(
                    File::create(&table_path).with_context(|| format!("Failed to create {}", table_path.display()))?,
                );
                functions.save(&mut writer).context("Failed to write function table")?;
                writer.flush()?;
                info!("{} traced functions in {}", functions.len(), image.display());
                println!("saved: {}", table_path.display());
            } else if with_source {
                let functions = symbolizer.traced_functions();
                if json {
                    println!("{}", serde_json::to_string_pretty(&functions)?);
                } else {
                    for f in &functions {
                        println!("{:#018x} {:>8} {} {}:{}", f.address, f.size, f.name, f.file, f.line);
                    }
                }
            } else {
                let symbols = symbolizer.function_symbols();
                if json {
                    println!("{}", serde_json::to_string_pretty(&symbols)?);
                } else {
                    for s in &symbols {
                        println!("{:#018x} {:>8} {}", s.address, s.size, s.name);
                    }
                }
            }
        }

        Command::Resolve { image, addresses, base, mapping_base, precise, build_id } => {
            let symbolizer = Symbolizer::open(&image)?;
            if let Some(expected) = &build_id {
                symbolizer.verify_build_id(expected)?;
            }
            let layout = base.map(|base| {
                if mapping_base {
                    ModuleLayout::from_mapping_base(base, symbolizer.info().load_bias)
                } else {
                    ModuleLayout::from_slide(base)
                }
            });
            let lines = if precise { Some(symbolizer.line_resolver()?) } else { None };

            for address in addresses {
                let image_address = match layout {
                    Some(layout) => match layout.to_image(address) {
                        Some(image_address) => image_address,
                        None => {
                            println!("{address:#x} <below module base>");
                            continue;
                        }
                    },
                    None => address,
                };

                match symbolizer.resolve(image_address) {
                    Some(resolved) => {
                        let location = match &resolved.location {
                            SourceLocation::Known { file, line } => format!("{file}:{line}"),
                            SourceLocation::Unknown => "<unknown location>".to_string(),
                        };
                        println!("{address:#x} {} {location}", resolved.name);
                    }
                    None => match symbolizer.symbol_table().find_containing(image_address) {
                        Some(symbol) => println!(
                            "{address:#x} <not indexed> (in {}+{:#x})",
                            demangle(&symbol.name),
                            image_address - symbol.address
                        ),
                        None => println!("{address:#x} <not indexed>"),
                    },
                }

                if let Some(lines) = &lines {
                    println!("    {}", lines.resolve(image_address).to_string().replace('\n', "\n    "));
                }
            }
        }

        Command::Demangle { names } => {
            for name in names {
                println!("{}", demangle(&name));
            }
        }

        Command::Decode { functions, recording, output, pid } => {
            let table_file = File::open(&functions)
                .with_context(|| format!("Failed to open function table {}", functions.display()))?;
            let table = FunctionTable::load(BufReader::new(table_file))
                .with_context(|| format!("Failed to parse function table {}", functions.display()))?;

            let recording_file = File::open(&recording)
                .with_context(|| format!("Failed to open recording {}", recording.display()))?;
            let trace = TraceData::from_records(BufReader::new(recording_file))
                .with_context(|| format!("Failed to decode {}", recording.display()))?;

            let mut exporter = ChromeTraceExporter::new(&table, pid);
            exporter.add_trace(&trace);

            let mut writer = BufWriter::new(
                File::create(&output).with_context(|| format!("Failed to create {}", output.display()))?,
            );
            exporter.export(&mut writer).context("Failed to write trace JSON")?;
            writer.flush()?;

            info!("{} events from {} threads", exporter.event_count(), trace.threads().len());
            println!("saved: {}", output.display());
        }
    }
    Ok(())
}
