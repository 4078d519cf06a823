use anyhow::{anyhow, bail, Context, Result};
use chrono::{Local, NaiveDate, NaiveDateTime};
use serde::Serialize;
use std::path::PathBuf;
use std::time::Duration;

use rollcall::attendance::{AttendanceService, EnrollRequest};
use rollcall::config::Config;
use rollcall::db::{AttendanceStatus, Database, Role};
use rollcall::error::RollcallError;
use rollcall::export::{export_attendance, ExportFormat};
use rollcall::faces::{Capture, GalleryCache, OnnxEncoder};
use rollcall::logging::{self, Fallback};

/// Command line options shared by every subcommand.
#[derive(Debug, Default)]
struct Options {
    config_path: Option<PathBuf>,
    command: Option<String>,
    image: Option<PathBuf>,
    image_base64: Option<String>,
    name: Option<String>,
    role: Option<Role>,
    class_name: Option<String>,
    notes: Option<String>,
    tolerance: Option<f32>,
    person: Option<i64>,
    embedding: Option<i64>,
    status: Option<AttendanceStatus>,
    marked_by: Option<String>,
    date: Option<NaiveDate>,
    days: Option<u32>,
    output: Option<PathBuf>,
    format: Option<ExportFormat>,
}

fn parse_args() -> Result<Options> {
    let args: Vec<String> = std::env::args().collect();
    let mut opts = Options::default();

    let mut i = 1;
    while i < args.len() {
        let arg = args[i].as_str();
        let mut value = || -> Result<String> {
            i += 1;
            args.get(i)
                .cloned()
                .ok_or_else(|| anyhow!("{} requires a value", arg))
        };

        match arg {
            "--help" | "-h" => {
                print_help();
                std::process::exit(0);
            }
            "--version" | "-V" => {
                println!("rollcall {}", env!("CARGO_PKG_VERSION"));
                std::process::exit(0);
            }
            "--config" | "-c" => opts.config_path = Some(PathBuf::from(value()?)),
            "--image" | "-i" => opts.image = Some(PathBuf::from(value()?)),
            "--image-base64" => opts.image_base64 = Some(value()?),
            "--name" | "-n" => opts.name = Some(value()?),
            "--role" | "-r" => opts.role = Some(value()?.parse()?),
            "--class" => opts.class_name = Some(value()?),
            "--notes" => opts.notes = Some(value()?),
            "--tolerance" | "-t" => {
                let raw = value()?;
                opts.tolerance = Some(raw.parse().with_context(|| format!("invalid tolerance '{}'", raw))?);
            }
            "--person" | "-p" => opts.person = Some(parse_id(&value()?)?),
            "--embedding" | "-e" => opts.embedding = Some(parse_id(&value()?)?),
            "--status" | "-s" => opts.status = Some(value()?.parse()?),
            "--by" => opts.marked_by = Some(value()?),
            "--date" | "-d" => {
                let raw = value()?;
                opts.date = Some(
                    NaiveDate::parse_from_str(&raw, "%Y-%m-%d")
                        .with_context(|| format!("invalid date '{}', expected YYYY-MM-DD", raw))?,
                );
            }
            "--days" => {
                let raw = value()?;
                opts.days = Some(raw.parse().with_context(|| format!("invalid day count '{}'", raw))?);
            }
            "--output" | "-o" => opts.output = Some(PathBuf::from(value()?)),
            "--format" | "-f" => opts.format = Some(value()?.parse()?),
            other if other.starts_with('-') => bail!("Unknown argument: {}", other),
            other => {
                if opts.command.is_some() {
                    bail!("Unexpected argument: {}", other);
                }
                opts.command = Some(other.to_string());
            }
        }
        i += 1;
    }

    Ok(opts)
}

fn parse_id(raw: &str) -> Result<i64> {
    raw.parse().with_context(|| format!("invalid id '{}'", raw))
}

fn print_help() {
    println!(
        r#"rollcall - face-recognition attendance

USAGE:
    rollcall [--config PATH] <COMMAND> [OPTIONS]

COMMANDS:
    enroll       --name N --role R [--class C] [--notes T] --image PATH
                 Enroll (or re-enroll) the single face in the image
    recognize    --image PATH [--tolerance T] [--role R]
                 Report who the single face in the image matches, without marking
    mark         --image PATH [--tolerance T] [--role R]
                 Mark the single person in the image present for today
    frame        --image PATH [--tolerance T]
                 Match and mark every face in the image
    set-status   --person ID --status present|absent|leave [--date D] [--notes T] [--by WHO]
    status       --person ID [--date D]
    history      --person ID [--days N]
                 A person's most recent N days on record
    records      [--date D] [--role R]
    stats        [--days N]
    pending      --role R
                 People with no active face enrollment
    export       --output PATH [--format json|csv] [--date D] [--role R]
    deactivate   --person ID
                 Deactivate every face embedding of a person
    forget       --embedding ID
                 Delete one face embedding

IMAGE INPUT (enroll, recognize, mark, frame):
    --image, -i PATH        Image file
    --image-base64 DATA     Base64 payload or data URL, in place of --image

OPTIONS:
    --config, -c PATH   Path to config file
    --version, -V       Show version
    --help, -h          Show this help message

ENVIRONMENT:
    ROLLCALL_CONFIG     Path to config file (overrides default location)
    ROLLCALL_LOG        Log level (trace, debug, info, warn, error)

Dates are YYYY-MM-DD and default to today. Output is JSON.

See also: rollcall-daemon --help"#
    );
}

fn main() -> Result<()> {
    let opts = match parse_args() {
        Ok(opts) => opts,
        Err(e) => {
            eprintln!("Error: {:#}", e);
            std::process::exit(1);
        }
    };

    let _ = logging::init(Fallback::File(Some(Config::config_dir().join("logs"))));

    match run(opts) {
        Ok(()) => Ok(()),
        Err(e) => match e.downcast_ref::<RollcallError>() {
            // Rejections are answers, not failures
            Some(rejection) => {
                print_json(&serde_json::json!({ "error": rejection.to_string() }))?;
                std::process::exit(2);
            }
            None => Err(e),
        },
    }
}

fn run(opts: Options) -> Result<()> {
    let command = match opts.command.as_deref() {
        Some(c) => c,
        None => {
            print_help();
            std::process::exit(1);
        }
    };

    let config = match &opts.config_path {
        Some(path) => Config::load_from(path)?,
        None => Config::load()?,
    };

    let db = Database::open(config.db_path())?;
    db.initialize()?;

    let encoder = OnnxEncoder::new(&config.models);
    let cache = GalleryCache::new(Duration::from_secs(config.recognition.cache_ttl_secs));
    let service = AttendanceService::new(&db, &encoder, &cache, &config.recognition)?;

    let now = Local::now().naive_local();
    let date = opts.date.unwrap_or_else(|| now.date());

    match command {
        "enroll" => {
            let request = EnrollRequest {
                name: require(opts.name.clone(), "--name")?,
                role: require(opts.role, "--role")?,
                class_name: opts.class_name.clone(),
                notes: opts.notes.clone(),
            };
            let capture = load_capture(&opts)?;
            print_json(&service.enroll(&request, &capture)?)
        }
        "recognize" => {
            let capture = load_capture(&opts)?;
            print_json(&service.recognize(&capture, opts.tolerance, opts.role, now)?)
        }
        "mark" => {
            let capture = load_capture(&opts)?;
            print_json(&service.mark_from_capture(&capture, opts.tolerance, opts.role, now)?)
        }
        "frame" => {
            let capture = load_capture(&opts)?;
            print_json(&service.process_frame(&capture, opts.tolerance, now)?)
        }
        "set-status" => {
            let at = NaiveDateTime::new(date, now.time());
            let record = service.set_status(
                require(opts.person, "--person")?,
                require(opts.status, "--status")?,
                at,
                opts.notes.as_deref(),
                opts.marked_by.as_deref(),
            )?;
            print_json(&record)
        }
        "status" => print_json(&service.status(require(opts.person, "--person")?, date)?),
        "history" => {
            let limit = opts.days.unwrap_or(30) as usize;
            print_json(&db.history_for_person(require(opts.person, "--person")?, limit)?)
        }
        "records" => print_json(&service.records(date, opts.role)?),
        "stats" => {
            let days = opts.days.unwrap_or(30);
            print_json(&Stats {
                students: db.enrollment_stats(Role::Student)?,
                teachers: db.enrollment_stats(Role::Teacher)?,
                recognition: db.recognition_success_rate(days, now)?,
                processed_captures: db.count_processed_captures()?,
            })
        }
        "pending" => print_json(&db.people_needing_enrollment(require(opts.role, "--role")?)?),
        "export" => {
            let output = require(opts.output.clone(), "--output")?;
            let format = opts
                .format
                .or_else(|| ExportFormat::from_path(&output))
                .unwrap_or(ExportFormat::Json);
            let count = export_attendance(&db, date, opts.role, &output, format)?;
            print_json(&serde_json::json!({
                "exported": count,
                "format": format.extension(),
                "path": output,
            }))
        }
        "deactivate" => {
            let count = service.deactivate(require(opts.person, "--person")?)?;
            print_json(&serde_json::json!({ "deactivated": count }))
        }
        "forget" => {
            let removed = service.forget_embedding(require(opts.embedding, "--embedding")?)?;
            print_json(&serde_json::json!({ "deleted": removed }))
        }
        other => bail!("Unknown command: {} (see --help)", other),
    }
}

#[derive(Serialize)]
struct Stats {
    students: rollcall::db::EnrollmentStats,
    teachers: rollcall::db::EnrollmentStats,
    recognition: rollcall::db::RecognitionStats,
    processed_captures: i64,
}

fn require<T>(value: Option<T>, flag: &str) -> Result<T> {
    value.ok_or_else(|| anyhow!("{} is required for this command", flag))
}

fn load_capture(opts: &Options) -> Result<Capture> {
    match (&opts.image, &opts.image_base64) {
        (Some(path), None) => Capture::from_path(path),
        (None, Some(data)) => Ok(Capture::from_base64(data)?),
        (Some(_), Some(_)) => bail!("use either --image or --image-base64, not both"),
        (None, None) => bail!("an image is required (--image PATH or --image-base64 DATA)"),
    }
}

fn print_json<T: Serialize + ?Sized>(value: &T) -> Result<()> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}
