use super::sources::LineSource;
use super::{SampleError, Sampler};
use crate::state::Snapshot;

/// Load averages parsed from `/proc/loadavg`. Only the first two values are
/// required; `fifteen` is `None` when the third column is missing or bad.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct LoadReading {
    pub one: f64,
    pub five: f64,
    pub fifteen: Option<f64>,
}

pub fn parse_loadavg(line: &str) -> Result<LoadReading, SampleError> {
    let values: Vec<f64> = line
        .split_whitespace()
        .take(3)
        .map_while(|f| f.parse::<f64>().ok())
        .take_while(|v| v.is_finite() && *v >= 0.0)
        .collect();

    match values.as_slice() {
        [one, five] => Ok(LoadReading {
            one: *one,
            five: *five,
            fifteen: None,
        }),
        [one, five, fifteen] => Ok(LoadReading {
            one: *one,
            five: *five,
            fifteen: Some(*fifteen),
        }),
        _ => Err(SampleError::malformed(line, "fewer than two load averages")),
    }
}

pub struct LoadSampler {
    source: Box<dyn LineSource>,
}

impl LoadSampler {
    pub fn new(source: Box<dyn LineSource>) -> Self {
        Self { source }
    }
}

impl Sampler for LoadSampler {
    const NAME: &'static str = "load";
    type Output = LoadReading;

    fn sample(&mut self) -> Result<LoadReading, SampleError> {
        let line = self.source.read_line()?;
        parse_loadavg(&line)
    }

    fn apply(reading: LoadReading, snapshot: &mut Snapshot) {
        snapshot.load.one = reading.one;
        snapshot.load.five = reading.five;
        if let Some(fifteen) = reading.fifteen {
            snapshot.load.fifteen = fifteen;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::state::LoadAverages;

    #[test]
    fn parses_full_loadavg_line() {
        let r = parse_loadavg("0.10 0.20 0.30 1/200 1234").unwrap();
        assert_eq!(
            r,
            LoadReading {
                one: 0.10,
                five: 0.20,
                fifteen: Some(0.30),
            }
        );
    }

    #[test]
    fn two_values_are_enough() {
        let r = parse_loadavg("1.5 2.5").unwrap();
        assert_eq!(r.fifteen, None);
        let r = parse_loadavg("1.5 2.5 junk").unwrap();
        assert_eq!(r.fifteen, None);
    }

    #[test]
    fn rejects_short_or_negative_lines() {
        assert!(parse_loadavg("").is_err());
        assert!(parse_loadavg("0.5").is_err());
        assert!(parse_loadavg("abc 0.1 0.2").is_err());
        assert!(parse_loadavg("-1.0 0.1 0.2").is_err());
        assert!(parse_loadavg("NaN 0.1 0.2").is_err());
    }

    #[test]
    fn missing_fifteen_keeps_previous_value() {
        let mut snap = Snapshot::new(1);
        snap.load = LoadAverages {
            one: 9.0,
            five: 9.0,
            fifteen: 3.0,
        };
        LoadSampler::apply(parse_loadavg("0.5 0.6").unwrap(), &mut snap);
        assert_eq!(
            snap.load,
            LoadAverages {
                one: 0.5,
                five: 0.6,
                fifteen: 3.0,
            }
        );

        LoadSampler::apply(parse_loadavg("0.10 0.20 0.30 1/200 1234").unwrap(), &mut snap);
        assert_eq!(
            snap.load,
            LoadAverages {
                one: 0.10,
                five: 0.20,
                fifteen: 0.30,
            }
        );
    }
}
