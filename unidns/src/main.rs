use std::cmp::max;
use std::io;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::{Duration, Instant};

use anyhow::{Context, Result};
use owo_colors::{OwoColorize, Style};
use tracing_subscriber::EnvFilter;
use unidns::proto::rdata::{EdnsOption, OptionCode};
use unidns::proto::{EdnsConfig, HeaderFlags, Message, Opcode, RCode, RecordType};
use unidns::{Resolver, Response, TsigState};

mod args;

use args::Args;

fn main() -> Result<()> {
    let args = Args::parse();

    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn")),
        )
        .with_writer(io::stderr)
        .init();

    let resolver = build_resolver(&args)?;

    let flags = HeaderFlags {
        rd: args.qtype != RecordType::AXFR,
        ad: args.fetch_dnssec,
        ..Default::default()
    };
    let query = Message::new_query(args.name.clone(), args.qtype, Opcode::QUERY, flags, None)
        .context("Could not create query.")?;

    let start = Instant::now();
    let response = resolver
        .send(&query)
        .with_context(|| format!("Query to {} failed.", resolver.address()))?;
    let elapsed = start.elapsed();

    display_result(&response, &args, resolver.address(), &elapsed)
}

fn build_resolver(args: &Args) -> Result<Resolver> {
    let mut resolver =
        Resolver::new(args.nameserver.as_deref()).context("Could not resolve nameserver.")?;
    if let Some(port) = args.port {
        resolver.set_port(port);
    }
    resolver.set_local_address(args.bind);
    resolver.set_tcp(args.tcp);
    resolver.set_ignore_truncation(args.ignore_tc);
    if let Some(timeout) = args.timeout {
        resolver.set_timeout_secs(timeout);
    }

    if args.edns {
        let flags = if args.fetch_dnssec {
            EdnsConfig::DO_FLAG
        } else {
            0
        };
        let mut options = Vec::new();
        if args.cookie {
            // a client cookie on its own, as the first query to a server carries it
            let client_cookie: [u8; 8] = rand::random();
            options.push(EdnsOption::new(OptionCode::Cookie, client_cookie));
        }
        resolver
            .set_edns_with(0, args.bufsize, flags, options)
            .context("Invalid EDNS configuration.")?;
    }

    if let Some(key) = &args.key {
        resolver.set_tsig_key(Some(Arc::new(key.clone())));
    }

    Ok(resolver)
}

fn display_result(
    res: &Response,
    args: &Args,
    nameserver: SocketAddr,
    elapsed: &Duration,
) -> Result<()> {
    let output = owo_colors::Stream::Stdout;

    if args.verbose {
        #[cfg(feature = "json")]
        if args.json {
            let json = serde_json::to_string_pretty(&res.message)
                .context("Could not serialize response.")?;
            println!("{}", json);
            return Ok(());
        }

        println!("{}", res.as_string(Some(output)));

        if args.print_meta {
            println!();
            println!(
                "{}",
                "Query metadata:".if_supports_color(output, |s| s.yellow())
            );
            println!("\tTime:        {} ms", elapsed.as_millis());
            println!("\tServer:      {}", nameserver);
            if args.key.is_some() {
                println!("\tSignature:   {:?}", res.tsig_state);
            }
        }
        return Ok(());
    }

    let all_answers: Vec<_> = res
        .answers
        .iter()
        .chain(res.authoritative_answers.iter())
        .chain(res.additional_answers.iter())
        // don't print OPT or TSIG records
        .filter_map(|record| record.as_nonopt())
        .filter(|record| record.rtype != RecordType::TSIG)
        .collect();

    #[cfg(feature = "json")]
    if args.json {
        let json =
            serde_json::to_string_pretty(&all_answers).context("Could not serialize answers.")?;
        println!("{}", json);
        return Ok(());
    }

    if all_answers.is_empty() {
        println!("<empty response>");
    } else if !args.pad_answers {
        for answer in &all_answers {
            println!("{}", answer.as_string(true, None, None, Some(output)));
        }
    } else {
        let (mut max_owner_len, mut max_type_len) = (0, 0);
        for answer in &all_answers {
            max_owner_len = max(max_owner_len, answer.owner.string_len());
            max_type_len = max(max_type_len, answer.rtype.to_string().len());
        }
        for answer in &all_answers {
            println!(
                "{}",
                answer.as_string(false, Some(max_owner_len), Some(max_type_len), Some(output))
            );
        }
    }

    if args.print_meta {
        let rcode = res.header.rcode.unwrap_or(RCode::NOERROR);
        let style = if rcode == RCode::NOERROR {
            Style::new().green()
        } else {
            Style::new().red()
        };

        println!();
        println!(
            "{} from {} in {} ms",
            rcode
                .to_string()
                .if_supports_color(output, |s| s.style(style)),
            nameserver,
            elapsed.as_millis()
        );

        if args.key.is_some() {
            let (text, style) = match res.tsig_state {
                TsigState::Verified => ("signature verified", Style::new().green()),
                TsigState::Failed => ("signature verification failed", Style::new().bold().red()),
                TsigState::Unverified => ("signature not checked", Style::new().yellow()),
            };
            println!("{}", text.if_supports_color(output, |s| s.style(style)));
        }
    }

    Ok(())
}
