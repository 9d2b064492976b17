use thiserror::Error;

pub type Result<T> = ::std::result::Result<T, anyhow::Error>;
pub use anyhow::format_err;

/// An error opening, fetching or parsing a seed.
#[derive(Debug, Error)]
#[error("{0}")]
pub struct SeedError(pub String);

/// An error locating or reading an archive index.
#[derive(Debug, Error)]
pub enum ArchiveError {
    #[error("no {0} files found")]
    MissingIndex(String),
    #[error("malformed {0} stanza: {1}")]
    MalformedStanza(String, String),
}

/// An internal resolver invariant violation.  Should not happen; fatal.
#[derive(Debug, Error)]
#[error("resolver invariant violated: {0}")]
pub struct ResolverError(pub String);

#[macro_export]
macro_rules! germinate_info {
    ($e:expr) => {
        {
            use ansi_term::Colour::Green;
            eprintln!("{}", Green.paint($e));
        }
    };

    ($fmt:expr, $( $arg:tt)+) => {
        {
            use ansi_term::Colour::Green;
            let print_string = format!($fmt, $($arg)+);
            eprintln!("{}", Green.paint(print_string));
        }
    };
}

#[macro_export]
macro_rules! germinate_warn {
    ($e:expr) => {
        {
            use ansi_term::Colour::RGB;
            eprintln!("{}", RGB(255,165,0).bold().paint($e));
        }
    };

    ($fmt:expr, $( $arg:tt)+) => {
        {
            use ansi_term::Colour::RGB;
            let print_string = RGB(255,165,0).bold().paint(format!($fmt, $($arg)+));
            eprintln!("{}", print_string);
        }
    };
}

#[macro_export]
macro_rules! germinate_bail {
    ($e:expr) => {{
        return Err(::anyhow::format_err!("{}", $e));
    }};

    ($fmt:expr, $( $arg:tt)+) => {
        {
            let error_string = format!($fmt, $($arg)+);
            return Err(::anyhow::format_err!("{}", error_string));
        }
    };
}

// Progress messages are a separate logical channel from diagnostics: they
// go to stdout unprefixed, where diagnostics carry a severity marker.
#[macro_export]
macro_rules! germinate_progress {
    ($e:expr) => {
        println!("{}", $e);
    };

    ($fmt:expr, $( $arg:tt)+) => {
        println!($fmt, $($arg)+);
    };
}
