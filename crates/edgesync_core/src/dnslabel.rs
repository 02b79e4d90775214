//! DNS label generation and reservation.
//!
//! A cloudlet gets a label unique in the region. Objects on a cloudlet get
//! a label unique within that cloudlet, so the fully qualified name of an
//! instance is `instance.cloudlet.region.root`. Reservations are plain keys
//! read and written through an [`Stm`], which makes picking a label and
//! claiming it atomic.

use crate::entities::{AppInst, Cloudlet, CloudletKey};
use crate::error::{StoreError, StoreResult};
use crate::object::ObjKey;
use crate::stm::Stm;
use tracing::debug;

/// Longest label a cloudlet may get.
pub const DNS_CLOUDLET_LABEL_MAX_LEN: usize = 63;

/// Longest label an object on a cloudlet may get.
pub const DNS_CLOUDLET_OBJECT_LABEL_MAX_LEN: usize = 63;

/// Label of a cloudlet's shared load balancer. Never assigned to an object.
pub const ROOT_LB_HOSTNAME: &str = "shared";

const RESERVED_CLOUDLET_OBJECT_LABELS: &[&str] = &[ROOT_LB_HOSTNAME];

/// Candidates tried before giving up on a unique label.
const MAX_LABEL_ATTEMPTS: usize = 10;

/// Type prefix of cloudlet label reservations.
pub const CLOUDLET_DNS_LABEL_TYPE: &str = "CloudletDnsLabel";

/// Type prefix of per-cloudlet object label reservations.
pub const CLOUDLET_OBJECT_DNS_LABEL_TYPE: &str = "CloudletObjectDnsLabel";

/// Makes `name` usable in a DNS label.
///
/// `_` becomes `-`. Space, `&`, `,`, `.` and `!` are dropped. The result
/// is lowercased and has no trailing `-`.
#[must_use]
pub fn dns_sanitize(name: &str) -> String {
    let mut out = String::with_capacity(name.len());
    for ch in name.chars() {
        match ch {
            '_' => out.push('-'),
            ' ' | '&' | ',' | '.' | '!' => {}
            _ => out.extend(ch.to_lowercase()),
        }
    }
    out.trim_end_matches('-').to_string()
}

/// Cuts `s` to at most `max` bytes on a character boundary.
fn truncate(s: &str, max: usize) -> &str {
    if s.len() <= max {
        return s;
    }
    let mut end = max;
    while !s.is_char_boundary(end) {
        end -= 1;
    }
    &s[..end]
}

/// Sanitizes `name` and cuts it to `max_len` bytes.
#[must_use]
pub fn dns_sanitize_trunc(name: &str, max_len: usize) -> String {
    truncate(&dns_sanitize(name), max_len).to_string()
}

/// Returns candidate number `counter` for `label`.
///
/// Candidate zero is the label itself. Later candidates append the counter,
/// shortening the label so the result fits in `max_len` bytes.
///
/// # Errors
///
/// Returns `Invalid` if the counter alone does not fit.
pub fn gen_next_dns_label(label: &str, max_len: usize, counter: usize) -> StoreResult<String> {
    let suffix = if counter > 0 {
        counter.to_string()
    } else {
        String::new()
    };
    if suffix.len() >= max_len {
        return Err(StoreError::invalid(format!(
            "suffix {suffix} cannot be longer than dns label max len of {max_len}"
        )));
    }
    let base = truncate(label, max_len - suffix.len());
    Ok(format!("{base}{suffix}"))
}

fn is_reserved_cloudlet_object_label(label: &str) -> bool {
    RESERVED_CLOUDLET_OBJECT_LABELS.contains(&label)
}

fn dns_label_error(base: &str) -> StoreError {
    StoreError::invalid(format!(
        "unable to compute unique DNS label from base label of {base:?}, please change key values"
    ))
}

/// Reserves cloudlet labels under `CloudletDnsLabel/<label>`.
#[derive(Debug, Clone, Copy, Default)]
pub struct CloudletDnsLabelStore;

impl CloudletDnsLabelStore {
    /// Returns the store key reserving `label`.
    #[must_use]
    pub fn db_key(label: &str) -> String {
        format!("{CLOUDLET_DNS_LABEL_TYPE}/{label}")
    }

    /// Returns true if `label` is reserved.
    ///
    /// # Errors
    ///
    /// Returns `Unavailable` if the store cannot be reached.
    pub fn stm_has(&self, stm: &mut Stm<'_>, label: &str) -> StoreResult<bool> {
        Ok(stm.get(&Self::db_key(label))?.is_some())
    }

    /// Reserves `label`.
    pub fn stm_put(&self, stm: &mut Stm<'_>, label: &str) {
        stm.put(Self::db_key(label), label.as_bytes().to_vec());
    }

    /// Releases `label`.
    pub fn stm_del(&self, stm: &mut Stm<'_>, label: &str) {
        stm.del(Self::db_key(label));
    }
}

/// Reserves object labels per cloudlet under
/// `CloudletObjectDnsLabel/<cloudlet-key>/<label>`.
#[derive(Debug, Clone, Copy, Default)]
pub struct CloudletObjectDnsLabelStore;

impl CloudletObjectDnsLabelStore {
    /// Returns the store key reserving `label` on `cloudlet`.
    ///
    /// # Errors
    ///
    /// Returns a codec error if the cloudlet key cannot be rendered.
    pub fn db_key(cloudlet: &CloudletKey, label: &str) -> StoreResult<String> {
        Ok(format!(
            "{CLOUDLET_OBJECT_DNS_LABEL_TYPE}/{}/{label}",
            cloudlet.key_string()?
        ))
    }

    /// Returns true if `label` is reserved on `cloudlet`.
    ///
    /// # Errors
    ///
    /// Returns `Unavailable` if the store cannot be reached.
    pub fn stm_has(
        &self,
        stm: &mut Stm<'_>,
        cloudlet: &CloudletKey,
        label: &str,
    ) -> StoreResult<bool> {
        Ok(stm.get(&Self::db_key(cloudlet, label)?)?.is_some())
    }

    /// Reserves `label` on `cloudlet`.
    ///
    /// # Errors
    ///
    /// Returns a codec error if the cloudlet key cannot be rendered.
    pub fn stm_put(
        &self,
        stm: &mut Stm<'_>,
        cloudlet: &CloudletKey,
        label: &str,
    ) -> StoreResult<()> {
        stm.put(Self::db_key(cloudlet, label)?, label.as_bytes().to_vec());
        Ok(())
    }

    /// Releases `label` on `cloudlet`.
    ///
    /// # Errors
    ///
    /// Returns a codec error if the cloudlet key cannot be rendered.
    pub fn stm_del(
        &self,
        stm: &mut Stm<'_>,
        cloudlet: &CloudletKey,
        label: &str,
    ) -> StoreResult<()> {
        stm.del(Self::db_key(cloudlet, label)?);
        Ok(())
    }
}

/// Picks an unreserved label for `cloudlet` and sets `cloudlet.dns_label`.
///
/// The caller reserves the label with [`CloudletDnsLabelStore::stm_put`] in
/// the same transaction.
///
/// # Errors
///
/// Returns `Invalid` if every candidate is taken.
pub fn set_cloudlet_dns_label(
    stm: &mut Stm<'_>,
    store: &CloudletDnsLabelStore,
    cloudlet: &mut Cloudlet,
) -> StoreResult<()> {
    // Name first so the likelier unique part survives truncation. The name
    // is capped so a long one cannot squeeze out the operator.
    let name = dns_sanitize_trunc(&cloudlet.key.name, 40);
    let oper = dns_sanitize_trunc(&cloudlet.key.operator_key.name, 20);
    let base = format!("{name}-{oper}");

    cloudlet.dns_label.clear();
    for counter in 0..MAX_LABEL_ATTEMPTS {
        let label = gen_next_dns_label(&base, DNS_CLOUDLET_LABEL_MAX_LEN, counter)?;
        if is_reserved_cloudlet_object_label(&label) || store.stm_has(stm, &label)? {
            debug!(%label, "cloudlet dns label taken");
            continue;
        }
        cloudlet.dns_label = label;
        return Ok(());
    }
    Err(dns_label_error(&base))
}

/// Picks a label for `inst` unreserved on its cloudlet and sets
/// `inst.dns_label`.
///
/// The caller reserves the label with
/// [`CloudletObjectDnsLabelStore::stm_put`] in the same transaction.
///
/// # Errors
///
/// Returns `Invalid` if every candidate is taken.
pub fn set_app_inst_dns_label(
    stm: &mut Stm<'_>,
    store: &CloudletObjectDnsLabelStore,
    inst: &mut AppInst,
) -> StoreResult<()> {
    let app_key = &inst.key.app_key;
    let mut app = dns_sanitize_trunc(&app_key.name, 60);
    let mut ver = dns_sanitize_trunc(&app_key.version, 60);
    let org = dns_sanitize_trunc(&app_key.developer_key.name, 60);
    let mut base = format!("{app}{ver}-{org}");
    if base.len() > DNS_CLOUDLET_OBJECT_LABEL_MAX_LEN {
        // Shorten name and version first so the org survives.
        app = truncate(&app, 40).to_string();
        ver = truncate(&ver, 10).to_string();
        base = format!("{app}{ver}-{org}");
    }

    let cloudlet = inst.key.cloudlet_key.clone();
    inst.dns_label.clear();
    for counter in 0..MAX_LABEL_ATTEMPTS {
        let label = gen_next_dns_label(&base, DNS_CLOUDLET_OBJECT_LABEL_MAX_LEN, counter)?;
        if is_reserved_cloudlet_object_label(&label) || store.stm_has(stm, &cloudlet, &label)? {
            debug!(%label, "app inst dns label taken");
            continue;
        }
        inst.dns_label = label;
        return Ok(());
    }
    Err(dns_label_error(&base))
}

/// Returns the name of a cloudlet's shared load balancer.
#[must_use]
pub fn cloudlet_root_lb_fqdn(cloudlet: &Cloudlet, region: &str, dns_root: &str) -> String {
    format!(
        "{ROOT_LB_HOSTNAME}.{}.{}.{dns_root}",
        cloudlet.dns_label,
        hostname_sanitize(region)
    )
}

/// Returns the fully qualified name of an instance on `cloudlet`.
#[must_use]
pub fn app_inst_fqdn(inst: &AppInst, cloudlet: &Cloudlet, region: &str, dns_root: &str) -> String {
    format!(
        "{}.{}.{}.{dns_root}",
        inst.dns_label,
        cloudlet.dns_label,
        hostname_sanitize(region)
    )
}

/// Sanitizes `name` into a single hostname label of at most 63 bytes.
#[must_use]
pub fn hostname_sanitize(name: &str) -> String {
    truncate(&dns_sanitize(name), 63)
        .trim_end_matches('-')
        .to_string()
}
