/*!
Round-robin database engine.

An archive set ([Rrd]) owns a list of data sources and a list of round-robin archives.

```plain
samples --> Rrd (time ordering) --> PdpState (one per data source)
                                       |
                                       | primary data points
                                       v
                                 RoundRobinArchive (one per archive)
                                       |  CdpState (one per data source)
                                       v
                                 RoundRobinBuffer rows --> Backend
```

Reading goes the other way: [Rrd::fetch] picks an archive and returns lazy
[archive::ArchiveWindow]s over its rows.
*/
pub mod archive;
pub mod consolidation;
mod database;
pub mod definition;
mod fetch;
pub mod pdp;
pub mod round_robin;

pub use database::{ArchiveDump, DataSourceState, InfoValue, Rrd, RrdDefinition, RrdDump, RrdState};
pub use fetch::{Fetch, FetchResult};

#[cfg(test)]
mod test;
