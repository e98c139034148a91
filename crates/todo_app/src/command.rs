use anyhow::{anyhow, bail, Result};
use chrono::{DateTime, NaiveDate, NaiveDateTime, NaiveTime, TimeZone, Utc};
use todo_core::Priority;

pub const HELP: &str = "\
commands:
  add <HH:MM | YYYY-MM-DD HH:MM> [low|medium|high] <name>
  list
  delete <n>
  save
  help
  quit";

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Command {
    Add {
        name: String,
        time: DateTime<Utc>,
        priority: Priority,
    },
    List,
    /// Zero-based row index.
    Delete { index: usize },
    Save,
    Help,
    Quit,
}

/// Parses one input line. A bare time of day is placed on `today` in `tz`.
/// Blank lines yield `None`.
pub fn parse<Tz: TimeZone>(line: &str, today: NaiveDate, tz: &Tz) -> Result<Option<Command>> {
    let mut tokens = line.split_whitespace();
    let Some(verb) = tokens.next() else {
        return Ok(None);
    };
    let rest: Vec<&str> = tokens.collect();
    let command = match verb.to_ascii_lowercase().as_str() {
        "add" | "a" => parse_add(&rest, today, tz)?,
        "list" | "ls" => Command::List,
        "delete" | "del" | "rm" => {
            let [row] = rest.as_slice() else {
                bail!("usage: delete <n>");
            };
            let row: usize = row
                .parse()
                .map_err(|_| anyhow!("`{row}` is not a row number"))?;
            if row == 0 {
                bail!("rows are numbered from 1");
            }
            Command::Delete { index: row - 1 }
        }
        "save" => Command::Save,
        "help" | "?" => Command::Help,
        "quit" | "exit" | "q" => Command::Quit,
        other => bail!("unknown command `{other}`, try `help`"),
    };
    Ok(Some(command))
}

fn parse_add<Tz: TimeZone>(args: &[&str], today: NaiveDate, tz: &Tz) -> Result<Command> {
    let Some((first, mut rest)) = args.split_first() else {
        bail!("usage: add <time> [priority] <name>");
    };

    let naive = match NaiveDate::parse_from_str(first, "%Y-%m-%d") {
        Ok(date) => {
            let Some((clock, tail)) = rest.split_first() else {
                bail!("missing time of day after {first}");
            };
            rest = tail;
            date.and_time(parse_time_of_day(clock)?)
        }
        Err(_) => today.and_time(parse_time_of_day(first)?),
    };
    let time = resolve_local(naive, tz)?;

    let mut priority = Priority::default();
    if let Some((candidate, tail)) = rest.split_first() {
        if let Ok(parsed) = candidate.parse::<Priority>() {
            if !tail.is_empty() {
                priority = parsed;
                rest = tail;
            }
        }
    }

    Ok(Command::Add {
        name: rest.join(" "),
        time,
        priority,
    })
}

/// Accepts 24-hour `14:30` or 12-hour `2:30pm`.
pub fn parse_time_of_day(input: &str) -> Result<NaiveTime> {
    let upper = input.trim().to_ascii_uppercase();
    NaiveTime::parse_from_str(&upper, "%H:%M")
        .or_else(|_| NaiveTime::parse_from_str(&upper, "%I:%M%p"))
        .map_err(|_| anyhow!("`{input}` is not a time of day (expected HH:MM)"))
}

fn resolve_local<Tz: TimeZone>(naive: NaiveDateTime, tz: &Tz) -> Result<DateTime<Utc>> {
    tz.from_local_datetime(&naive)
        .earliest()
        .map(|local| local.with_timezone(&Utc))
        .ok_or_else(|| anyhow!("{naive} does not exist in the local time zone"))
}
