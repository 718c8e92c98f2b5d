use crate::DomainResult;
use crate::entity::Versioned;
use crate::ports::store::EntityLookup;

/// Detects a duplicate submission before any side effect happens.
///
/// Lookup order: the external id when present (covers webhook replay),
/// then the natural key. A backend outage during either lookup must
/// surface as an error; treating it as not-found would risk creating a
/// duplicate under uncertainty.
pub async fn find_existing<T, S>(
    store: &S,
    external_id: Option<&str>,
    natural_key: &str,
) -> DomainResult<Option<Versioned<T>>>
where
    S: EntityLookup<T> + ?Sized,
{
    if let Some(external_id) = external_id {
        if let Some(existing) = store.find_by_external_id(external_id).await? {
            return Ok(Some(existing));
        }
    }
    store.find_by_natural_key(natural_key).await
}

pub fn backoff_ms(base_ms: u64, attempt: u32, max_ms: u64) -> u64 {
    if attempt == 0 {
        return 0;
    }
    let pow = 2u64.saturating_pow(attempt.saturating_sub(1));
    let delay = base_ms.saturating_mul(pow);
    delay.min(max_ms)
}
