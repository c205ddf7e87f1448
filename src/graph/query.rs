use std::time::Duration;

use crate::caps::Caps;

/// Questions asked of elements and pipelines.
#[derive(Clone, Debug, PartialEq)]
pub enum Query {
    /// Latency introduced between capture and render
    Latency {
        live: bool,
        min: Duration,
        max: Option<Duration>,
    },
    /// Caps currently produced by an element
    Caps { result: Option<Caps> },
}

impl Query {
    pub fn latency() -> Self {
        Query::Latency {
            live: false,
            min: Duration::ZERO,
            max: None,
        }
    }

    pub fn caps() -> Self {
        Query::Caps { result: None }
    }

    /// Fold another element's latency answer into this one.
    ///
    /// Minimum latencies add up to the largest one, maximum latencies shrink
    /// to the smallest one.
    pub(crate) fn merge_latency(&mut self, other: &Query) {
        if let (
            Query::Latency { live, min, max },
            Query::Latency {
                live: other_live,
                min: other_min,
                max: other_max,
            },
        ) = (self, other)
        {
            if !*other_live {
                return;
            }
            *live = true;
            *min = (*min).max(*other_min);
            *max = match (*max, *other_max) {
                (Some(a), Some(b)) => Some(a.min(b)),
                (a, b) => a.or(b),
            };
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn merge_keeps_largest_min_and_smallest_max() {
        let mut total = Query::latency();
        total.merge_latency(&Query::Latency {
            live: true,
            min: Duration::from_millis(10),
            max: Some(Duration::from_millis(200)),
        });
        total.merge_latency(&Query::Latency {
            live: true,
            min: Duration::from_millis(20),
            max: Some(Duration::from_millis(100)),
        });
        // non-live answers do not contribute
        total.merge_latency(&Query::Latency {
            live: false,
            min: Duration::from_secs(5),
            max: None,
        });
        assert_eq!(
            total,
            Query::Latency {
                live: true,
                min: Duration::from_millis(20),
                max: Some(Duration::from_millis(100)),
            }
        );
    }
}
