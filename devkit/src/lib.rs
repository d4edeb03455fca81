/*!
# zbx1c DevKit - stubs and utilities for testing the RAC pipeline

- Stub rac runner with scripted output, delays and invocation recording
- RAC text fixtures (clusters, sessions, connections, jobs, infobases)
- Test harness wiring the stub into a real repository
*/

pub mod fixtures;
pub mod rac_stub;
pub mod test_utils;

pub use fixtures::{minutes_ago, rac_time, RacText};
pub use rac_stub::{StubResponse, StubRunner};
pub use test_utils::TestHarness;
