use std::fmt;

use chrono::{NaiveDate, Utc};

/// Where the query engine writes the results of a query
///
/// Results are grouped per day below a fixed key prefix: `<bucket>/<prefix>/YYYY/MM/DD`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResultLocation {
    bucket: String,
    key: String,
}

impl ResultLocation {
    pub fn for_date(bucket: &str, key_prefix: &str, date: NaiveDate) -> Self {
        Self {
            bucket: bucket.trim_end_matches('/').to_string(),
            key: format!("{}/{}", key_prefix.trim_matches('/'), date.format("%Y/%m/%d")),
        }
    }

    /// Location for queries issued on the current UTC date
    pub fn today(bucket: &str, key_prefix: &str) -> Self {
        Self::for_date(bucket, key_prefix, Utc::now().date_naive())
    }

    pub fn bucket(&self) -> &str {
        &self.bucket
    }

    pub fn key(&self) -> &str {
        &self.key
    }
}

impl fmt::Display for ResultLocation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.bucket, self.key)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn dated_key() {
        let date = NaiveDate::from_ymd_opt(2017, 8, 26).unwrap();
        let location = ResultLocation::for_date(
            "s3://aws-athena-query-results-111111111111-us-east-1/",
            "athena_partition_refresh",
            date,
        );

        assert_eq!(location.key(), "athena_partition_refresh/2017/08/26");
        assert_eq!(
            location.to_string(),
            "s3://aws-athena-query-results-111111111111-us-east-1/athena_partition_refresh/2017/08/26"
        );
    }

    #[test]
    fn today_uses_current_date() {
        let location = ResultLocation::today("s3://results", "/refresh/");
        let expected = format!("refresh/{}", Utc::now().date_naive().format("%Y/%m/%d"));
        assert_eq!(location.key(), expected);
        assert_eq!(location.bucket(), "s3://results");
    }
}
