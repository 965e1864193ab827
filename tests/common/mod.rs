//! Sample documents shared by the integration tests

#![allow(dead_code)]

pub const MORIA1: &str = "D586D18309DED4CD6D57C18FDB97EFA96D330566";
pub const TOR26: &str = "14C131DFC5C6F93646BE72FA1401C02A8DF2E8B4";

/// Consensus referencing the votes of tor26 and moria1
pub const CONSENSUS: &str = "@type network-status-consensus-3 1.0
network-status-version 3
vote-status consensus
consensus-method 11
valid-after 2011-11-30 09:00:00
fresh-until 2011-11-30 10:00:00
valid-until 2011-11-30 12:00:00
voting-delay 300 300
client-versions 0.2.1.31,0.2.2.34
server-versions 0.2.1.31,0.2.2.34
known-flags Authority BadExit Exit Fast Guard HSDir Named Running Stable Unnamed V2Dir Valid
params CircuitPriorityHalflifeMsec=30000 bwauthpid=1
dir-source tor26 14C131DFC5C6F93646BE72FA1401C02A8DF2E8B4 86.59.21.38 86.59.21.38 80 443
contact Peter Palfrader
vote-digest 0B6D1E9A300B895AA2D0B427F92917B6995C3C1C
dir-source moria1 D586D18309DED4CD6D57C18FDB97EFA96D330566 128.31.0.34 128.31.0.34 9131 9101
contact 1024D/28988BF5 arma mit edu
vote-digest 5FCF44F3DAE8F3F1E0DD6E3E6DF1E0DA1D2D6A8E
dir-source moria1-legacy E2A2AF570166665D738736D0DD58169CC61D8A8B 128.31.0.34 128.31.0.34 9131 9101
r seele AAoQ1DAR6kkoo19hBAX5K0QztNw ASG1ZhB4Ad0SsjTzBpA+V8+zWkQ 2011-11-30 08:02:47 67.161.31.147 9001 0
s Running Stable Valid
v Tor 0.2.2.34
w Bandwidth=20
p reject 1-65535
r Unnamed AAvcgAIRgm4yWWG4xHtSeZmY9TY ARuaIiMaDVJ1lw4gd1WmDy6Tk0A 2011-11-30 06:37:47 91.121.146.120 443 80
s Exit Fast Running V2Dir Valid
v Tor 0.2.2.34
w Bandwidth=50 Measured=60
p accept 80,443
directory-footer
bandwidth-weights Wbd=3333 Wbe=0 Wbg=0 Wbm=10000
directory-signature 14C131DFC5C6F93646BE72FA1401C02A8DF2E8B4 BF112F1C6D5543CFD0A32215ACABD4197B5279AD
-----BEGIN SIGNATURE-----
AAAA
-----END SIGNATURE-----
directory-signature D586D18309DED4CD6D57C18FDB97EFA96D330566 5AFAC3D00E97D4C6B8B4E0A5E1B0C3A4E5F6A7B8
-----BEGIN SIGNATURE-----
BBBB
-----END SIGNATURE-----
";

/// Vote of moria1
pub const VOTE: &str = "network-status-version 3
vote-status vote
consensus-methods 28 29 30
published 2020-05-01 11:50:00
valid-after 2020-05-01 12:00:00
fresh-until 2020-05-01 13:00:00
valid-until 2020-05-01 15:00:00
voting-delay 300 300
client-versions 0.4.2.7
server-versions 0.4.2.7
known-flags Authority Exit Fast Guard HSDir Running Stable V2Dir Valid
flag-thresholds stable-uptime=1693440 fast-speed=102000 guard-wfu=98.000% enough-mtbf=1
params CircwindowCell=1000
dir-source moria1 D586D18309DED4CD6D57C18FDB97EFA96D330566 128.31.0.34 128.31.0.34 9131 9101
contact 1024D/28988BF5 arma mit edu
shared-rand-participate
shared-rand-commit 1 sha3-256 D586D18309DED4CD6D57C18FDB97EFA96D330566 AAAAAFqLAABIsM5A
shared-rand-current-value 9 ZG9uZQ
dir-key-certificate-version 3
fingerprint D586D18309DED4CD6D57C18FDB97EFA96D330566
dir-key-published 2020-01-01 00:00:00
dir-key-expires 2021-01-01 00:00:00
dir-identity-key
-----BEGIN RSA PUBLIC KEY-----
MIIBigKCAYEA
-----END RSA PUBLIC KEY-----
dir-signing-key
-----BEGIN RSA PUBLIC KEY-----
MIGJAoGBAL
-----END RSA PUBLIC KEY-----
dir-key-certification
-----BEGIN SIGNATURE-----
d8vtgJ4G
-----END SIGNATURE-----
r seele AAoQ1DAR6kkoo19hBAX5K0QztNw ASG1ZhB4Ad0SsjTzBpA+V8+zWkQ 2020-05-01 08:02:47 67.161.31.147 9001 0
s Running Stable Valid
v Tor 0.4.2.7
w Bandwidth=20 Measured=30
p reject 1-65535
id ed25519 none
m 28,29 sha256=ungWv48Bz+pBQUDeXa4iI7ADYaOWF3qctBD/YfIAFa0
m 30 sha256=ungWv48Bz+pBQUDeXa4iI7ADYaOWF3qctBD/YfIAFa0
stats wfu=0.991 tk=25 mtbf=300
directory-footer
directory-signature D586D18309DED4CD6D57C18FDB97EFA96D330566 5AFAC3D00E97D4C6B8B4E0A5E1B0C3A4E5F6A7B8
-----BEGIN SIGNATURE-----
AAAA
-----END SIGNATURE-----
";

/// The sample vote, as published by the authority with identity `hex`
pub fn vote_of(hex: &str) -> String {
    VOTE.replace(MORIA1, hex)
}

pub const RELAY: &str = "@type server-descriptor 1.0
router moria1 128.31.0.34 9101 0 9131
identity-ed25519
-----BEGIN ED25519 CERT-----
AQQABp6xAb2+
-----END ED25519 CERT-----
master-key-ed25519 5q7Nl9SuiBJmqDRBbdy3g0+Tq6nRBzZ2GO5QUeUfnAw
platform Tor 0.4.2.7 on Linux
proto Cons=1-2 Desc=1-2 DirCache=1-2 HSDir=1-2 HSIntro=3-4 HSRend=1-2 Link=1-5 LinkAuth=1,3 Microdesc=1-2 Relay=1-2
published 2020-05-01 10:53:47
fingerprint 9695 DFC3 5FFE B861 329B 9F1A B04C 4639 7020 CE31
uptime 1734016
bandwidth 512000 62914560 2133940
extra-info-digest 2AF0F5AAB8D2FBEDA1E3E5D8B5F72836DA0DD3BC R4lphW+QHnNTlxPQCpHLyeYE5qR3AJ6Y8Fz34O1HDTw
onion-key
-----BEGIN RSA PUBLIC KEY-----
MIGJAoGBAKHf
-----END RSA PUBLIC KEY-----
signing-key
-----BEGIN RSA PUBLIC KEY-----
MIGJAoGBALtk
-----END RSA PUBLIC KEY-----
onion-key-crosscert
-----BEGIN CROSSCERT-----
CcUdvWb38Bq
-----END CROSSCERT-----
ntor-onion-key-crosscert 0
-----BEGIN ED25519 CERT-----
AQoABp6xAeYy
-----END ED25519 CERT-----
hidden-service-dir
contact 1024D/28988BF5 arma mit edu
family $0AA4D94FE1D20C4C9B5B3AF52FDB8B54F9A81E1B=alice bob
ntor-onion-key ARsYkHAVdAEjXQr0gJS7sm3cF/Yc1BbFjMwTTUzpKxw
reject 0.0.0.0/8:*
reject 10.0.0.0/8:*
accept *:80
accept *:443
reject *:*
ipv6-policy accept 80,443
tunnelled-dir-server
router-sig-ed25519 Ywp0oWQ4+4oX4GHZkdxDzt3Yn9xT6M2hQb1Lhg6PgLFYD9e9gJ5XhQz2GUt0qOrPnhRpyjvkKDYDHnlzWBpxBQ
router-signature
-----BEGIN SIGNATURE-----
hNhjQpu9jwKg
-----END SIGNATURE-----
";

pub const EXIT_LIST: &str = "Downloaded 2012-02-29 23:02:02
ExitNode 0011BD2485AD45D984EC4159C88FC066E5E3300E
Published 2012-02-29 17:06:49
LastStatus 2012-02-29 18:02:19
ExitAddress 31.172.30.2 2012-02-29 18:06:01
";

pub const MICRODESCS: &str = "@type microdescriptor 1.0
onion-key
-----BEGIN RSA PUBLIC KEY-----
MIGJAoGBAMhPQtZ
-----END RSA PUBLIC KEY-----
ntor-onion-key ARsYkHAVdAEjXQr0gJS7sm3cF/Yc1BbFjMwTTUzpKxw
p accept 80,443
@last-listed 2020-05-01 12:00:00
onion-key
ntor-onion-key R4lphW+QHnNTlxPQCpHLyeYE5qR3AJ6Y8Fz34O1HDTw
id ed25519 5q7Nl9SuiBJmqDRBbdy3g0+Tq6nRBzZ2GO5QUeUfnAw
onion-key
ntor-onion-key ungWv48Bz+pBQUDeXa4iI7ADYaOWF3qctBD/YfIAFa0
";
