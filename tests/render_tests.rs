//! Integration tests for setup script rendering.
//!
//! The built-in template and the binding derivation must stay in sync: a
//! release where the template grows a placeholder the bindings do not
//! provide has to fail loudly here, not on a user's machine mid-install.

use zfsstrap::plan::{Credentials, InitSystem, InstallPlan, Secret, SwapStrategy, VideoDriver};
use zfsstrap::render::{self, Bindings};
use zfsstrap::storage::{plan_provisioning, StorageHandle};
use zfsstrap::topology;

fn plan() -> InstallPlan {
    InstallPlan {
        device: "/dev/nvme0n1".to_string(),
        encryption: true,
        luks_passphrase: Some(Secret::new("tr0ub4dor")),
        swap_strategy: SwapStrategy::Zram,
        swap_size: "8G".to_string(),
        init_system: InitSystem::Systemd,
        locale: "de_DE.UTF-8".to_string(),
        timezone: "Europe/Berlin".to_string(),
        hostname: "zfsbox".to_string(),
        credentials: Credentials {
            username: "alex".to_string(),
            user_password: Secret::new("userpw1"),
            root_password: Secret::new("rootpw1"),
        },
        video_drivers: vec![VideoDriver::Amd, VideoDriver::Intel],
    }
}

fn rendered_default() -> String {
    let plan = plan();
    let topo = topology::resolve(&plan.device, plan.swap_strategy).unwrap();
    let handle = plan_provisioning(&topo, &plan).handle;
    let bindings = render::bindings_for(&plan, &topo, &handle);

    render::render(render::default_template(), &bindings)
        .expect("built-in template must render against derived bindings")
        .content()
        .to_string()
}

#[test]
fn test_default_template_fully_bound() {
    let script = rendered_default();

    // No placeholder syntax survives rendering
    assert!(
        render::scan_placeholders(&script).is_empty(),
        "unrendered placeholders left in script"
    );
}

#[test]
fn test_rendered_script_carries_plan_values() {
    let script = rendered_default();

    assert!(script.contains("zfsbox"));
    assert!(script.contains("de_DE.UTF-8"));
    assert!(script.contains("Europe/Berlin"));
    assert!(script.contains("useradd -m -G wheel -s /bin/bash \"alex\""));
    assert!(script.contains("/dev/nvme0n1p2"));
}

#[test]
fn test_rendered_script_never_contains_passwords() {
    let script = rendered_default();

    // Secrets arrive via the chroot environment, not the script text
    assert!(!script.contains("userpw1"));
    assert!(!script.contains("rootpw1"));
    assert!(!script.contains("tr0ub4dor"));
    assert!(script.contains("${ROOT_PASSWORD}"));
    assert!(script.contains("${USER_PASSWORD}"));
}

#[test]
fn test_encryption_branches_follow_plan() {
    let script = rendered_default();
    assert!(script.contains("[ \"true\" = \"true\" ]"));
    assert!(script.contains("cryptroot"));

    let mut unencrypted = plan();
    unencrypted.encryption = false;
    unencrypted.luks_passphrase = None;
    let topo = topology::resolve(&unencrypted.device, unencrypted.swap_strategy).unwrap();
    let handle = plan_provisioning(&topo, &unencrypted).handle;
    let bindings = render::bindings_for(&unencrypted, &topo, &handle);
    let script = render::render(render::default_template(), &bindings).unwrap();

    assert!(script.content().contains("[ \"false\" = \"true\" ]"));
}

#[test]
fn test_video_drivers_joined_with_spaces() {
    let plan = plan();
    let topo = topology::resolve(&plan.device, plan.swap_strategy).unwrap();
    let handle = plan_provisioning(&topo, &plan).handle;
    let bindings = render::bindings_for(&plan, &topo, &handle);

    assert_eq!(bindings["VIDEO_DRIVERS"], "amd intel");
}

#[test]
fn test_swap_partition_binding_empty_for_zram() {
    let plan = plan();
    let topo = topology::resolve(&plan.device, plan.swap_strategy).unwrap();
    let handle = plan_provisioning(&topo, &plan).handle;
    let bindings = render::bindings_for(&plan, &topo, &handle);

    assert_eq!(bindings["SWAP_PARTITION"], "");
    assert_eq!(bindings["ZRAM_SWAP"], "true");
}

#[test]
fn test_pool_device_binding_uses_mapper_when_encrypted() {
    let plan = plan();
    let topo = topology::resolve(&plan.device, plan.swap_strategy).unwrap();
    let handle = plan_provisioning(&topo, &plan).handle;
    let bindings = render::bindings_for(&plan, &topo, &handle);

    assert_eq!(bindings["POOL_DEVICE"], "/dev/mapper/cryptroot");
}

#[test]
fn test_unbound_placeholder_lists_every_missing_name() {
    let err = render::render("{{AAA}} {{BBB}}", &Bindings::new()).unwrap_err();
    let msg = err.to_string();
    assert!(msg.contains("AAA"));
    assert!(msg.contains("BBB"));
}

#[test]
fn test_handle_type_constructible_for_custom_templates() {
    // Custom templates get the same bindings; POOL_DEVICE follows the handle
    let handle = StorageHandle {
        device: "/dev/sda2".into(),
    };
    let mut plan = plan();
    plan.device = "/dev/sda".to_string();
    plan.encryption = false;
    plan.luks_passphrase = None;
    let topo = topology::resolve(&plan.device, plan.swap_strategy).unwrap();
    let bindings = render::bindings_for(&plan, &topo, &handle);
    assert_eq!(bindings["POOL_DEVICE"], "/dev/sda2");
}
