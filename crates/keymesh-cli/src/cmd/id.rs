//! `keymesh id`: print a fresh identity.

use anyhow::Result;
use keymesh_types::Identity;

pub fn cmd_id(json: bool) -> Result<()> {
    let identity = Identity::generate();
    let address = identity.address();
    let public_key = hex::encode(identity.public_key());

    if json {
        let out = serde_json::json!({
            "address": address.to_string(),
            "name": address.short_name(),
            "public_key": public_key,
        });
        println!("{}", serde_json::to_string_pretty(&out)?);
    } else {
        println!("name:       {}", address.short_name());
        println!("address:    {address}");
        println!("public key: {public_key}");
    }
    Ok(())
}
