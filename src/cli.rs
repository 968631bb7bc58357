use std::io::{self, BufRead, BufReader, Write};
use std::net::TcpStream;

use clap::Parser;
use rtcache::model::UpsertRequest;
use rtcache::parser::{self, Command};
use rtcache::server::{Request, Response};
use uuid::Uuid;

#[derive(Parser, Debug)]
#[clap(author, version, about = "Interactive client for the rtcache daemon", long_about = None)]
struct Args {
    #[clap(long, default_value = "127.0.0.1:9400")]
    addr: String,
}

/// One connection for the whole session; requests and replies are JSON lines.
struct Client {
    reader: BufReader<TcpStream>,
    writer: TcpStream,
}

impl Client {
    fn connect(addr: &str) -> io::Result<Self> {
        let writer = TcpStream::connect(addr)?;
        let reader = BufReader::new(writer.try_clone()?);
        Ok(Self { reader, writer })
    }

    fn call(&mut self, request: &Request) -> Result<Response, String> {
        let mut line = serde_json::to_vec(request).map_err(|e| e.to_string())?;
        line.push(b'\n');
        self.writer.write_all(&line).map_err(|e| e.to_string())?;

        let mut reply = String::new();
        if self.reader.read_line(&mut reply).map_err(|e| e.to_string())? == 0 {
            return Err("Server closed the connection".into());
        }
        serde_json::from_str(&reply).map_err(|e| format!("Malformed reply: {}", e))
    }
}

fn main() {
    let args = Args::parse();
    print_banner();

    let mut client = match Client::connect(&args.addr) {
        Ok(client) => {
            println!("[\u{2713}] Connected to rtcache at {}!", args.addr);
            client
        }
        Err(_) => {
            println!("[\u{2717}] Could not connect to server at {}.", args.addr);
            println!("    Make sure the rtcache daemon is running.");
            return;
        }
    };
    println!("Type 'HELP' for supported commands or 'EXIT' to quit.\n");

    let stdin = io::stdin();
    let mut buffer = String::new();

    loop {
        print!("rtcache> ");
        let _ = io::stdout().flush();
        buffer.clear();

        match stdin.lock().read_line(&mut buffer) {
            Ok(0) | Err(_) => break,
            Ok(_) => {}
        }
        if buffer.trim().is_empty() { continue; }

        match parser::parse_command(&buffer) {
            Ok(Command::Exit) => break,
            Ok(Command::Help) => print_help(),
            Ok(cmd) => {
                if let Err(e) = execute_command(&mut client, cmd) {
                    println!("[\u{26a0}\u{fe0f} Error] {}", e);
                }
            }
            Err(e) => {
                println!("[\u{2717} Syntax Error] {}", e);
                if buffer.contains("...") {
                    println!("    \u{2139}\u{fe0f}  Hint: Ellipses (...) are not supported. Please close the list: [0.1, 0.5]");
                } else if buffer.to_uppercase().starts_with("SEARCH") {
                    println!("    \u{2139}\u{fe0f}  Hint: Try 'SEARCH [0.1, 0.2] LIMIT 5'");
                }
            }
        }
    }
}

fn print_banner() {
    println!("\n==================================================");
    println!("   rtcache CLI - realtime index cache");
    println!("==================================================\n");
}

fn print_help() {
    println!("\n--- Available Commands ---");
    println!("1. UPSERT:  UPSERT ['id'] [0.1, ...] \"text\"   (vector or NONE, text optional)");
    println!("2. GET:     GET 'id'");
    println!("3. DELETE:  DELETE 'id'");
    println!("4. SEARCH:  SEARCH [0.1, ...] LIMIT 5");
    println!("5. STATS:   STATS");
    println!("6. FLUSH:   FLUSH   (push one batch downstream now)");
    println!("7. EXIT:    Quit\n");
}

fn to_request(cmd: Command) -> Option<(Request, Option<String>)> {
    let request = match cmd {
        Command::Upsert { id, vector, text } => {
            let id = id.unwrap_or_else(|| Uuid::new_v4().to_string());
            let mut req = UpsertRequest::new(id.clone());
            req.vector = vector;
            req.text = text;
            return Some((Request::Upsert(req), Some(id)));
        }
        Command::Get { id } => Request::Get { id },
        Command::Delete { id } => Request::Delete { id },
        Command::Search { vector, limit } => Request::Search { vector, top_k: limit },
        Command::Stats => Request::Stats,
        Command::Flush => Request::Flush,
        Command::Help | Command::Exit => return None,
    };
    Some((request, None))
}

fn execute_command(client: &mut Client, cmd: Command) -> Result<(), String> {
    let (request, upserted_id) = match to_request(cmd) {
        Some(pair) => pair,
        None => return Ok(()),
    };

    match client.call(&request)? {
        Response::Upserted => println!("[\u{2713} OK] Upserted ID: {}", upserted_id.unwrap_or_default()),
        Response::Found { entry } => {
            let pretty = serde_json::to_string_pretty(&entry).map_err(|e| e.to_string())?;
            println!("{}", pretty);
        }
        Response::NotFound => println!("[\u{2717}] ID Not Found."),
        Response::Deleted { existed: true } => println!("[\u{2713} OK] Deleted."),
        Response::Deleted { existed: false } => println!("[\u{2717}] ID Not Found."),
        Response::Hits { hits } => {
            println!("\nFound {} matches:", hits.len());
            for hit in hits {
                let preview: String = hit.entry.text.as_deref().unwrap_or("").chars().take(40).collect();
                println!("  \u{2022} {} (Score: {:.4}) {}", hit.entry.id, hit.score, preview);
            }
            println!();
        }
        Response::Stats { stats } => {
            let pretty = serde_json::to_string_pretty(&stats).map_err(|e| e.to_string())?;
            println!("{}", pretty);
        }
        Response::Flushed { delivered } => println!("[\u{2713} OK] Flushed {} entries.", delivered),
        Response::Error { message } => return Err(message),
    }
    Ok(())
}
