//! Command line arguments.

use std::path::PathBuf;

use clap::Parser;
use shuxk_core::config::Config;
use shuxk_core::portal::AmbiguousPolicy;

#[derive(Parser, Debug)]
#[command(name = "shuxk")]
#[command(about = "Wait for the SHU course selection window and submit your courses")]
#[command(version)]
pub struct Args {
    /// 8-digit student id
    #[arg(value_name = "STUDENT_ID")]
    pub student_id: String,

    /// Course list, one courseCode-teacherCode per line
    #[arg(long, value_name = "FILE", default_value = "courses.txt")]
    pub courses: PathBuf,

    /// Print capacity of COURSE-TEACHER and exit (repeatable)
    #[arg(long, value_name = "COURSE-TEACHER")]
    pub query: Vec<String>,

    /// Stop waiting for the window after this many seconds
    #[arg(long, value_name = "SECS")]
    pub timeout: Option<u64>,

    /// Seconds between probes while the window is closed
    #[arg(long, value_name = "SECS")]
    pub interval: Option<u64>,

    /// Log in again when the portal answers with an unrecognised page
    #[arg(long)]
    pub reauth_on_ambiguous: bool,

    /// Remove the saved session and keychain password before logging in
    #[arg(long)]
    pub forget_password: bool,

    /// Also write logs to this file
    #[arg(long, value_name = "FILE")]
    pub log_file: Option<PathBuf>,

    /// More output (-v for debug)
    #[arg(short, long, action = clap::ArgAction::Count)]
    pub verbose: u8,
}

impl Args {
    /// Fold command line overrides into the loaded config.
    pub fn apply(&self, config: &mut Config) {
        if let Some(timeout) = self.timeout {
            config.window_timeout_secs = Some(timeout);
        }
        if let Some(interval) = self.interval {
            config.poll_interval_secs = interval;
        }
        if self.reauth_on_ambiguous {
            config.on_ambiguous = AmbiguousPolicy::Reauthenticate;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let args = Args::try_parse_from(["shuxk", "19120001"]).unwrap();
        assert_eq!(args.student_id, "19120001");
        assert_eq!(args.courses, PathBuf::from("courses.txt"));
        assert!(args.query.is_empty());
        assert_eq!(args.verbose, 0);

        let mut config = Config::default();
        args.apply(&mut config);
        assert_eq!(config, Config::default());
    }

    #[test]
    fn test_overrides_apply_to_config() {
        let args = Args::try_parse_from([
            "shuxk",
            "19120001",
            "--timeout",
            "600",
            "--interval",
            "10",
            "--reauth-on-ambiguous",
            "--query",
            "00853619-1774",
            "--query",
            "08305014-1001",
            "-v",
        ])
        .unwrap();
        assert_eq!(args.query.len(), 2);
        assert_eq!(args.verbose, 1);

        let mut config = Config::default();
        args.apply(&mut config);
        assert_eq!(config.window_timeout_secs, Some(600));
        assert_eq!(config.poll_interval_secs, 10);
        assert_eq!(config.on_ambiguous, AmbiguousPolicy::Reauthenticate);
    }

    #[test]
    fn test_student_id_required() {
        assert!(Args::try_parse_from(["shuxk"]).is_err());
    }
}
