/*!
[Polygon](https://polygon.io/)-format CSV tick IO
*/
use super::Tick;
use crate::error::Result;
use chrono::NaiveDateTime;
use std::io::{Read, Write};
use std::str::FromStr;
use tracing::warn;

/// The polygon DateTime format
pub const POLYGON_DATETIME: &str = "%Y-%m-%d %H:%M:%S";

/// Read polygon tick data from a Reader.
///
/// With a date format, records are read positionally as `t, v, vw, o, c, h, l, n`; unparseable numbers become NaN and
/// records with an unparseable timestamp are skipped. Without one, records are deserialized by header.
pub fn read_ticks<R: Read>(rdr: R, date_format: Option<&str>) -> Result<Vec<Tick>> {
    let date_format = if let Some(format) = date_format {
        format
    } else {
        return Ok(deserialize_ticks(rdr).collect::<std::result::Result<_, _>>()?);
    };
    let mut ticks = Vec::new();
    let mut skipped = 0;
    for record in csv::Reader::from_reader(rdr).into_records() {
        let record = record?;
        let mut record = record.iter();
        let t = match record
            .next()
            .and_then(|first| NaiveDateTime::parse_from_str(first, date_format).ok())
        {
            Some(t) => t,
            None => {
                skipped += 1;
                continue;
            }
        };
        let mut tick = Tick {
            t,
            v: f64::NAN,
            vw: f64::NAN,
            o: f64::NAN,
            c: f64::NAN,
            h: f64::NAN,
            l: f64::NAN,
            n: f64::NAN,
        };
        for (i, field) in record.enumerate().take(<Tick>::NN_FIELDS) {
            let value = f64::from_str(field.trim()).unwrap_or(f64::NAN);
            match i {
                0 => tick.v = value,
                1 => tick.vw = value,
                2 => tick.o = value,
                3 => tick.c = value,
                4 => tick.h = value,
                5 => tick.l = value,
                _ => tick.n = value,
            }
        }
        ticks.push(tick);
    }
    if skipped > 0 {
        warn!(skipped, "skipped records with unparseable timestamps");
    }
    Ok(ticks)
}

/// Deserialize tick data
pub fn deserialize_ticks<R: Read>(rdr: R) -> impl Iterator<Item = std::result::Result<Tick, csv::Error>> {
    csv::Reader::from_reader(rdr).into_deserialize()
}

/// Write tick data to a Writer
/// On success, return how many ticks were written
pub fn write_ticks<W, I>(wtr: W, ticks: I) -> Result<usize>
where
    W: Write,
    I: Iterator<Item = Tick>,
{
    let mut wtr = csv::Writer::from_writer(wtr);
    let mut written = 0;
    for tick in ticks {
        wtr.serialize(tick)?;
        written += 1;
    }
    wtr.flush()?;
    Ok(written)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn positional_records() {
        let csv = "t,v,vw,o,c,h,l,n\n\
                   2020-06-22 09:30:00,300,39.5,40,40.5,41,39,2\n\
                   not a date,1,1,1,1,1,1,1\n\
                   2020-06-22 09:31:00,500,40.25,40.5,x,41.5,38,4\n";
        let ticks = read_ticks(csv.as_bytes(), Some(POLYGON_DATETIME)).unwrap();
        assert_eq!(ticks.len(), 2);
        assert_eq!(ticks[0].v, 300.0);
        assert_eq!(ticks[0].c, 40.5);
        assert_eq!(ticks[1].o, 40.5);
        assert!(ticks[1].c.is_nan());
        assert_eq!(ticks[1].n, 4.0);
    }
}
