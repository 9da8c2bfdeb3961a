//! CLI argument definition and parsing.

use std::env;
use std::net::{IpAddr, SocketAddr};
use std::process;
use std::str::FromStr;

use data_encoding::BASE64;
use owo_colors::OwoColorize;
use unidns::proto::{EdnsConfig, Name, RecordType};
use unidns::{Algorithm, HmacKey};

#[derive(Debug)]
pub struct Args {
    pub nameserver: Option<String>,
    pub name: Name,
    pub qtype: RecordType,
    pub port: Option<u16>,
    pub bind: Option<SocketAddr>,
    pub key: Option<HmacKey>,
    pub timeout: Option<u64>,
    pub tcp: bool,
    pub ignore_tc: bool,
    pub edns: bool,
    pub bufsize: u16,
    pub fetch_dnssec: bool,
    pub cookie: bool,
    pub verbose: bool,
    #[cfg(feature = "json")]
    pub json: bool,
    pub print_meta: bool,
    pub pad_answers: bool,
}

enum ConsumeNext {
    Port,
    Bind,
    Key,
    Timeout,
}

const DEFAULT_URL: &str = "example.com.";
const DEFAULT_QTYPE: RecordType = RecordType::A;

impl Args {
    pub fn parse() -> Self {
        // skip executable name
        Self::parse_from(env::args().skip(1))
    }

    fn parse_from(args: impl IntoIterator<Item = String>) -> Self {
        let mut nameserver = None;
        let mut name = DEFAULT_URL.to_string();
        let mut qtype = DEFAULT_QTYPE;
        let mut port = None;
        let mut bind = None;
        let mut key = None;
        let mut timeout = None;
        let mut tcp = false;
        let mut ignore_tc = false;
        let mut edns = true;
        let mut bufsize = EdnsConfig::DEFAULT_PAYLOAD_SIZE;
        let mut fetch_dnssec = false;
        let mut cookie = false;
        let mut verbose = false;
        #[cfg(feature = "json")]
        let mut json = false;
        let mut print_meta = true;
        let mut pad_answers = true;

        let mut reverse = false;
        let mut consume_next = None;

        for arg in args {
            if let Some(to_consume) = consume_next.take() {
                match to_consume {
                    ConsumeNext::Port => match arg.parse::<u16>() {
                        Ok(val) => port = Some(val),
                        Err(_) => err(format!("Invalid port: {}.", arg)),
                    },
                    ConsumeNext::Bind => bind = Some(parse_bind(&arg)),
                    ConsumeNext::Key => key = Some(parse_key(&arg)),
                    ConsumeNext::Timeout => match arg.parse::<u64>() {
                        Ok(val) => timeout = Some(val),
                        Err(_) => err(format!("Invalid timeout: {}.", arg)),
                    },
                }
            } else if let Some(ns) = arg.strip_prefix('@') {
                // nameserver
                nameserver = Some(ns.to_string());
            } else if let Some(flag) = arg.strip_prefix('+') {
                // flags
                match flag {
                    "verbose" => {
                        verbose = true;
                    }
                    #[cfg(feature = "json")]
                    "json" => {
                        json = true;
                    }
                    "no-meta" => {
                        print_meta = false;
                    }
                    "no-padding" => {
                        pad_answers = false;
                    }
                    "do" => {
                        fetch_dnssec = true;
                    }
                    "cookie" => {
                        cookie = true;
                    }
                    "tcp" => {
                        tcp = true;
                    }
                    "ignore-tc" => {
                        ignore_tc = true;
                    }
                    "no-edns" => {
                        edns = false;
                    }
                    x => match x.strip_prefix("bufsize=").map(str::parse::<u16>) {
                        Some(Ok(size)) => bufsize = size,
                        Some(Err(_)) => err(format!("Invalid buffer size: +{}.", x)),
                        None => err(format!("Invalid flag: +{}.", x)),
                    },
                }
            } else if let Some(option) = arg.strip_prefix('-') {
                // options
                match option {
                    "h" | "-help" => {
                        print_help();
                        process::exit(0);
                    }
                    "V" | "-version" => {
                        print_version();
                        process::exit(0);
                    }
                    "p" | "-port" => {
                        consume_next = Some(ConsumeNext::Port);
                    }
                    "b" | "-bind" => {
                        consume_next = Some(ConsumeNext::Bind);
                    }
                    "y" | "-key" => {
                        consume_next = Some(ConsumeNext::Key);
                    }
                    "t" | "-timeout" => {
                        consume_next = Some(ConsumeNext::Timeout);
                    }
                    "x" => {
                        reverse = true;
                    }
                    x => {
                        err(format!("Invalid option: -{}.", x));
                    }
                }
            } else {
                match RecordType::from_str(&arg.to_uppercase()) {
                    Ok(t) => {
                        qtype = t;
                    }
                    Err(_) => {
                        // use URL as fallback
                        name = arg;
                    }
                }
            }
        }

        if consume_next.is_some() {
            err("Missing value for the last option.");
        }

        if verbose && !pad_answers {
            err("Cannot use both +verbose and +no-padding.");
        }

        if !edns && (fetch_dnssec || cookie) {
            err("+do and +cookie need EDNS and cannot be used with +no-edns.");
        }

        if reverse {
            name = match IpAddr::from_str(&name) {
                Ok(addr) => reverse_name(addr),
                Err(_) => err(format!(
                    "Expected IP address for reverse lookup, but got: {}.",
                    name
                )),
            };
            qtype = RecordType::PTR;
        }

        let name = match Name::from_ascii(name) {
            Ok(name) => name,
            Err(e) => err(e.to_string()),
        };

        Self {
            nameserver,
            name,
            qtype,
            port,
            bind,
            key,
            timeout,
            tcp,
            ignore_tc,
            edns,
            bufsize,
            fetch_dnssec,
            cookie,
            verbose,
            #[cfg(feature = "json")]
            json,
            print_meta,
            pad_answers,
        }
    }
}

/// Builds the `in-addr.arpa`/`ip6.arpa` name for `addr`.
fn reverse_name(addr: IpAddr) -> String {
    match addr {
        IpAddr::V4(addr) => {
            let octets = addr.octets();
            format!(
                "{}.{}.{}.{}.in-addr.arpa",
                octets[3], octets[2], octets[1], octets[0]
            )
        }
        IpAddr::V6(addr) => {
            let mut name = String::with_capacity(72);
            for s in addr.segments().iter().rev() {
                for c in format!("{:04x}", s).chars().rev() {
                    name.push(c);
                    name.push('.');
                }
            }
            name.push_str("ip6.arpa");
            name
        }
    }
}

/// Accepts either a bare IP address or an address with port.
fn parse_bind(arg: &str) -> SocketAddr {
    if let Ok(addr) = arg.parse::<SocketAddr>() {
        return addr;
    }
    match arg.parse::<IpAddr>() {
        Ok(ip) => SocketAddr::new(ip, 0),
        Err(_) => err(format!("Invalid bind address: {}.", arg)),
    }
}

/// Parses `[alg:]name:base64secret`.
fn parse_key(arg: &str) -> HmacKey {
    let parts: Vec<_> = arg.split(':').collect();
    let (algorithm, name, secret) = match parts[..] {
        [name, secret] => (Algorithm::default(), name, secret),
        [alg, name, secret] => match alg.parse::<Algorithm>() {
            Ok(alg) => (alg, name, secret),
            Err(e) => err(e),
        },
        _ => err(format!("Invalid key, expected [alg:]name:secret: {}.", arg)),
    };
    let name = match Name::from_ascii(name) {
        Ok(name) => name,
        Err(e) => err(format!("Invalid key name: {}", e)),
    };
    let secret = match BASE64.decode(secret.as_bytes()) {
        Ok(secret) => secret,
        Err(e) => err(format!("Invalid key secret: {}.", e)),
    };
    match HmacKey::new(name, algorithm, &secret) {
        Ok(key) => key,
        Err(e) => err(format!("Invalid key: {}", e)),
    }
}

macro_rules! var {
    ($var:expr) => {
        $var.if_supports_color(owo_colors::Stream::Stdout, |s| s.green())
    };
}

macro_rules! printopt {
    ($opt:expr, $desc:expr) => {
        println!(
            "\t    {:<33} ({})",
            $opt.if_supports_color(owo_colors::Stream::Stdout, |s| s.yellow()),
            $desc,
        )
    };
}

macro_rules! printflag {
    ($flag:expr, $desc:expr) => {
        println!(
            "\t    {:<14} ({})",
            $flag.if_supports_color(owo_colors::Stream::Stdout, |s| s.yellow()),
            $desc,
        )
    };
}

fn print_help() {
    let output = owo_colors::Stream::Stdout;
    print!("{}", "Usage:".if_supports_color(output, |s| s.purple()));
    println!(
        "\tunidns [@{}] [{}] [{}] [{}] [{}]",
        var!("nameserver"),
        var!("domain"),
        var!("q-type"),
        var!("options"),
        var!("flags")
    );
    println!();

    println!("{}", "Where:".if_supports_color(output, |s| s.purple()));

    println!(
        "\t{} is the IP address or hostname of a DNS nameserver",
        var!("nameserver")
    );
    println!();

    println!("\t{} is the domain you want to query", var!("domain"));
    println!();

    println!(
        "\t{} is the record type you want (e.g. A, AAAA, TXT, MX, SOA, AXFR, ...)",
        var!("q-type")
    );
    println!();

    println!("\t{} is one or more of the following:", var!("options"));
    printopt!("-h | --help", "print this help message");
    printopt!("-V | --version", "print the version of unidns");
    printopt!("-p | --port <port>", "use the given port number");
    printopt!("-b | --bind <address>", "send queries from this address");
    printopt!("-y | --key <[alg:]name:secret>", "sign queries with this TSIG key");
    printopt!("-t | --timeout <seconds>", "give up after this many seconds");
    printopt!("-x", "shortcut for reverse lookup");
    println!();
    println!("\t{} is one or more of the following:", var!("flags"));
    printflag!(
        "+verbose",
        "print all sections, i.e. header, OPT, and question"
    );
    #[cfg(feature = "json")]
    printflag!("+json", "format output as JSON; may be used with +verbose");
    printflag!(
        "+no-meta",
        "don't print query metadata, e.g. server and time"
    );
    printflag!(
        "+no-padding",
        "don't pad output; cannot be used with +verbose"
    );
    printflag!("+tcp", "use TCP instead of UDP");
    printflag!("+ignore-tc", "don't retry truncated responses over TCP");
    printflag!("+no-edns", "don't send an OPT record");
    printflag!("+bufsize=<n>", "advertise this UDP payload size");
    printflag!("+do", "fetch DNSSEC records");
    printflag!("+cookie", "send a random DNS client cookie to the server");
    println!();

    println!("Note: the order of the arguments does not matter.");
    println!();

    println!(
        "If no nameserver is given, {} is used. The default query is `{}`.",
        var!(unidns::default_resolver()),
        format!("unidns {} {}", DEFAULT_URL, DEFAULT_QTYPE)
            .if_supports_color(output, |s| s.green())
    );
    println!();

    println!(
        "Output is colourized by default. This can be tuned using the {}/\n{} environment variables.",
        var!("FORCE_COLOR"),
        var!("NO_COLOR")
    );
    println!(
        "Log output on stderr is controlled by the {} environment variable.",
        var!("RUST_LOG")
    );
}

fn print_version() {
    println!("unidns v{}", env!("CARGO_PKG_VERSION"));
}

fn err(msg: impl AsRef<str>) -> ! {
    eprintln!("{}", msg.as_ref());
    process::exit(1)
}
